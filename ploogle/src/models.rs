//! Core data models for Ploogle
//!
//! A chapter is the indexed unit. A work (book) is the set of chapters sharing a
//! `book_id`; its first section is always the synthetic "Summary" chapter with
//! ordinal 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chapter title used unless the e-book carries the original chapter title
pub const SUMMARY_TITLE: &str = "Summary";

// ─────────────────────────────────────────────────────────────────────────────
// DOCUMENTS
// ─────────────────────────────────────────────────────────────────────────────

/// One indexed section of a work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// `book_id/section_id`, unique across the corpus
    pub id: String,
    pub book_id: String,
    /// Title of the work the chapter belongs to
    pub title: String,
    /// Ordinal within the work; 0 is the summary unit
    pub chapter: u64,
    pub chapter_title: String,
    pub author: String,
    /// Canonical source URL, may point at the chapter rather than the work
    pub url: String,
    pub chapter_text: String,
    pub chapter_notes: Option<String>,
}

impl Chapter {
    /// Compose the corpus-wide chapter id from a work id and a section id
    pub fn compose_id(book_id: &str, section_id: &str) -> String {
        format!("{}/{}", book_id, section_id)
    }
}

/// Work-level metadata read from an e-book
#[derive(Debug, Clone, PartialEq)]
pub struct BookInfo {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub url: String,
    pub description: Option<String>,
    /// Last update time as recorded by the source site
    pub last_update: Option<DateTime<Utc>>,
}

/// A work with its chapters in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub info: BookInfo,
    pub chapters: Vec<Chapter>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SEARCH RESULTS
// ─────────────────────────────────────────────────────────────────────────────

/// A raw engine hit: a chapter plus its relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chapter: Chapter,
    pub score: f32,
}

/// A result as handed to callers. The chapter body never leaves the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultItem {
    pub id: String,
    pub book_id: String,
    pub title: String,
    pub chapter: u64,
    pub chapter_title: String,
    pub author: String,
    pub url: String,
    pub chapter_notes: Option<String>,
    pub score: f32,
}

impl From<SearchHit> for ResultItem {
    fn from(hit: SearchHit) -> Self {
        let Chapter {
            id,
            book_id,
            title,
            chapter,
            chapter_title,
            author,
            url,
            chapter_text: _,
            chapter_notes,
        } = hit.chapter;
        Self {
            id,
            book_id,
            title,
            chapter,
            chapter_title,
            author,
            url,
            chapter_notes,
            score: hit.score,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// QUERY PARAMETERS
// ─────────────────────────────────────────────────────────────────────────────

/// How query terms are combined by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combine {
    And,
    #[default]
    Or,
}

impl FromStr for Combine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Combine::And),
            "OR" => Ok(Combine::Or),
            other => Err(format!("unknown combine operator '{}', expected AND or OR", other)),
        }
    }
}

impl fmt::Display for Combine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combine::And => f.write_str("AND"),
            Combine::Or => f.write_str("OR"),
        }
    }
}

/// Caller-supplied search options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParams {
    /// 1-based; clamped into the valid range when read
    pub page: i64,
    pub operator: Combine,
    /// Keep only hits whose url starts with `https://<domain>`
    pub domain: Option<String>,
    /// Accepted from callers but never forwarded: fuzzy matching is always off
    pub fuzzy: bool,
    pub match_all: bool,
    pub random: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            page: 1,
            operator: Combine::Or,
            domain: None,
            fuzzy: true,
            match_all: false,
            random: false,
        }
    }
}

/// Pagination block of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    /// 1-based page actually served
    pub page: u64,
    pub pages: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultInfo {
    pub count: u64,
    pub page: PageInfo,
    /// Query latency in milliseconds
    pub perf: f64,
    pub params: QueryParams,
    pub query: String,
}

/// One page of deduplicated results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPage {
    pub data: Vec<ResultItem>,
    pub info: ResultInfo,
}

/// What a search produces: a page, or a single random url in random mode
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutput {
    Page(ResultPage),
    Random(Option<String>),
}

// ─────────────────────────────────────────────────────────────────────────────
// TEXT NORMALIZATION
// ─────────────────────────────────────────────────────────────────────────────

/// Collapse every whitespace run to a single space and trim both ends
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !result.is_empty();
            continue;
        }
        if pending_space {
            result.push(' ');
            pending_space = false;
        }
        result.push(ch);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> Chapter {
        Chapter {
            id: Chapter::compose_id("urn:1", "file0001"),
            book_id: "urn:1".to_string(),
            title: "A Title".to_string(),
            chapter: 1,
            chapter_title: "Chapter One".to_string(),
            author: "someone".to_string(),
            url: "https://example.org/works/1".to_string(),
            chapter_text: "long body".to_string(),
            chapter_notes: None,
        }
    }

    #[test]
    fn test_compose_id() {
        assert_eq!(Chapter::compose_id("urn:1", "file0001"), "urn:1/file0001");
    }

    #[test]
    fn test_result_item_drops_body() {
        let item = ResultItem::from(SearchHit { chapter: chapter(), score: 2.5 });
        assert_eq!(item.id, "urn:1/file0001");
        assert_eq!(item.score, 2.5);

        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("chapter_text").is_none());
    }

    #[test]
    fn test_combine_parsing() {
        assert_eq!("and".parse::<Combine>().unwrap(), Combine::And);
        assert_eq!(" OR ".parse::<Combine>().unwrap(), Combine::Or);
        assert!("xor".parse::<Combine>().is_err());
        assert_eq!(Combine::And.to_string(), "AND");
    }

    #[test]
    fn test_query_params_defaults() {
        let params = QueryParams::default();
        assert_eq!(params.page, 1);
        assert_eq!(params.operator, Combine::Or);
        assert!(params.domain.is_none());
        assert!(!params.match_all);
        assert!(!params.random);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  hello\n\n  world\t "), "hello world");
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace(" \n "), "");
    }
}
