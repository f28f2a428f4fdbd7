//! Source listing: fetching, parsing and staleness classification
//!
//! The listing is one paginated feed of works, newest update first. Each entry
//! shows a heading link to the work and a display date. Entries that lack
//! either are skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::timestamps::parse_timestamp;

/// Tolerance when comparing listing dates with e-book dates. Listing dates
/// carry no time of day and may be a timezone shift away from the e-book's.
pub const STALENESS_WINDOW_MS: i64 = 2 * 60 * 60 * 1000 + 1;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("ploogle/", env!("CARGO_PKG_VERSION"));

static ENTRY: Lazy<Selector> = Lazy::new(|| Selector::parse("ol > li > div").expect("valid selector"));
static DATETIME: Lazy<Selector> = Lazy::new(|| Selector::parse(".datetime").expect("valid selector"));
static HEADING_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("h4 a[href]").expect("valid selector"));

#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Listing returned HTTP {0}")]
    Status(u16),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid listing URL: {0}")]
    Url(#[from] url::ParseError),
}

/// One work as shown on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    /// Detail link as written in the page, usually site-relative
    pub link: String,
    pub updated: DateTime<Utc>,
}

/// Outcome of classifying one listing page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageScan {
    /// Detail links of dirty entries, in page order
    pub dirty: Vec<String>,
    /// An entry older than the reference was found on this page
    pub reached_clean: bool,
}

/// Parse every well-formed entry from a listing page, in page order
pub fn parse_listing(html: &str) -> Vec<ListingEntry> {
    let doc = Html::parse_document(html);
    let mut entries = Vec::new();

    for block in doc.select(&ENTRY) {
        let Some(date) = block.select(&DATETIME).next() else {
            continue;
        };
        let raw_date = date.text().collect::<String>();
        let Some(updated) = parse_timestamp(&raw_date) else {
            debug!(date = raw_date.trim(), "Skipping listing entry with unreadable date");
            continue;
        };
        let Some(link) = block
            .select(&HEADING_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
        else {
            debug!("Skipping listing entry without a detail link");
            continue;
        };

        entries.push(ListingEntry {
            link: link.to_string(),
            updated,
        });
    }

    entries
}

/// Whether an entry updated at `updated` may carry content newer than `reference`
pub fn is_dirty(reference: DateTime<Utc>, updated: DateTime<Utc>) -> bool {
    (reference - updated).num_milliseconds() < STALENESS_WINDOW_MS
}

/// Collect dirty entries up to the first clean one. Entries must be ordered
/// newest first; everything after the first clean entry is treated as clean.
pub fn classify(entries: &[ListingEntry], reference: DateTime<Utc>) -> PageScan {
    let mut scan = PageScan::default();
    for entry in entries {
        if !is_dirty(reference, entry.updated) {
            scan.reached_clean = true;
            break;
        }
        scan.dirty.push(entry.link.clone());
    }
    scan
}

/// Resolve a detail link against the site base. Absolute links pass through.
pub fn resolve_link(base: &str, link: &str) -> Option<String> {
    if link.starts_with("http://") || link.starts_with("https://") {
        return Some(link.to_string());
    }
    if link.starts_with("//") {
        return Some(format!("https:{}", link));
    }
    Url::parse(base).ok()?.join(link).ok().map(|u| u.to_string())
}

/// Anything that can serve listing pages by 1-based page number
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<String, ListingError>;
}

/// The live listing over HTTP
pub struct HttpListing {
    client: reqwest::Client,
    base: Url,
}

impl HttpListing {
    pub fn new(listing_url: &str) -> Result<Self, ListingError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base: Url::parse(listing_url)?,
        })
    }

    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }
}

#[async_trait]
impl ListingSource for HttpListing {
    async fn fetch_page(&self, page: u32) -> Result<String, ListingError> {
        let url = self.page_url(page);
        debug!(%url, "Fetching listing page");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ListingError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}
