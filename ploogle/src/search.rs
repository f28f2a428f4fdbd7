//! Result aggregation: raw chapter hits -> one page of per-story results
//!
//! The engine returns every matching chapter best first. The aggregator keeps
//! the first hit of each book, optionally narrows to hits whose metadata
//! contains the literal query, drops chapter bodies and then either pages the
//! survivors or picks one of them at random.

use crate::index::{IndexError, IndexManager, IndexState};
use crate::models::{
    Chapter, Combine, PageInfo, QueryParams, ResultInfo, ResultItem, ResultPage, SearchHit,
    SearchOutput,
};
use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search index is not ready (state: {0})")]
    NotReady(IndexState),
    #[error(transparent)]
    Index(IndexError),
}

impl From<IndexError> for SearchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotReady(state) => SearchError::NotReady(state),
            other => SearchError::Index(other),
        }
    }
}

impl From<crate::indexer::IndexerError> for SearchError {
    fn from(err: crate::indexer::IndexerError) -> Self {
        SearchError::Index(IndexError::Engine(err))
    }
}

/// Query front end over the shared index
pub struct SearchService {
    index: Arc<IndexManager>,
    page_size: u64,
}

impl SearchService {
    pub fn new(index: Arc<IndexManager>, page_size: usize) -> Self {
        Self {
            index,
            page_size: page_size.max(1) as u64,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Run a query. `params.fuzzy` is accepted but has no effect: the engine
    /// is always queried without fuzzy matching.
    pub fn search(&self, query: &str, params: &QueryParams) -> Result<SearchOutput, SearchError> {
        let engine = self.index.engine()?;
        let start = Instant::now();

        let domain = params.domain.as_deref().filter(|d| !d.is_empty());
        let hits = engine.search(query, params.operator, |chapter: &Chapter| {
            domain.map_or(true, |d| domain_matches(&chapter.url, d))
        })?;
        let raw_count = hits.len();

        let mut grouped = group_by_book(hits);
        if params.match_all {
            grouped = filter_match_all(grouped, query);
        }
        let items: Vec<ResultItem> = grouped.into_iter().map(ResultItem::from).collect();

        if params.random {
            return Ok(SearchOutput::Random(pick_random(&items)));
        }

        let page = paginate(items.len() as u64, self.page_size, params.page);
        let count = items.len() as u64;
        let data: Vec<ResultItem> = items
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        let perf = start.elapsed().as_secs_f64() * 1000.0;

        debug!(query, raw_count, count, page = page.page, perf, "Search served");

        Ok(SearchOutput::Page(ResultPage {
            data,
            info: ResultInfo {
                count,
                page,
                perf,
                params: params.clone(),
                query: query.to_string(),
            },
        }))
    }

    /// Pick one URL at random. With a query, the pick comes from that query's
    /// results; without one, or when the query finds nothing, from the whole
    /// URL pool.
    pub fn random(&self, query: Option<&str>) -> Result<Option<String>, SearchError> {
        self.index.engine()?;

        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            let params = QueryParams {
                operator: Combine::Or,
                random: true,
                ..QueryParams::default()
            };
            if let SearchOutput::Random(Some(url)) = self.search(query, &params)? {
                return Ok(Some(url));
            }
            debug!(query, "No results for random pick, falling back to URL pool");
        }

        Ok(self.index.random_url())
    }
}

/// Keep the first hit of every book, preserving engine order
pub fn group_by_book(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.chapter.book_id.clone()))
        .collect()
}

/// Keep hits whose title, chapter title, notes or author contain `query`
/// literally (case-sensitive). Chapter text is not consulted.
pub fn filter_match_all(hits: Vec<SearchHit>, query: &str) -> Vec<SearchHit> {
    // Escaped so user input is never interpreted as a pattern
    let pattern = Regex::new(&regex::escape(query)).ok();
    let matches = |field: &str| match &pattern {
        Some(re) => re.is_match(field),
        None => field.contains(query),
    };

    hits.into_iter()
        .filter(|hit| {
            let c = &hit.chapter;
            matches(&c.title)
                || matches(&c.chapter_title)
                || c.chapter_notes.as_deref().is_some_and(&matches)
                || matches(&c.author)
        })
        .collect()
}

pub fn domain_matches(url: &str, domain: &str) -> bool {
    url.strip_prefix("https://")
        .is_some_and(|rest| rest.starts_with(domain))
}

/// Compute the page actually served for `requested`: below 1 reads as 1,
/// past the end reads as the last page.
pub fn paginate(count: u64, page_size: u64, requested: i64) -> PageInfo {
    let limit = page_size.max(1);
    let pages = count.div_ceil(limit);
    let page = (requested.max(1) as u64).min(pages.max(1));

    PageInfo {
        page,
        pages,
        limit,
        offset: (page - 1) * limit,
    }
}

pub fn pick_random(items: &[ResultItem]) -> Option<String> {
    items.choose(&mut rand::thread_rng()).map(|item| item.url.clone())
}
