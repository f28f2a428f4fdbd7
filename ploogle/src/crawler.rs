//! Freshness crawler: find works changed since the last indexed update and
//! re-ingest them
//!
//! The reference point is the newest last-update time among the e-books on the
//! shelf. Listing pages are walked from page 1 while every entry on a page is
//! dirty. The first page holding a clean entry is the last one fetched.
//! Each page's dirty works are converted and indexed with bounded
//! concurrency, then one checkpoint is taken for the page.

use crate::convert::{ConvertError, Converter};
use crate::extractor::{self, ExtractError};
use crate::index::{IndexError, IndexManager};
use crate::listing::{classify, parse_listing, resolve_link, ListingError, ListingSource};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("No e-book in {dir} carries a last-update date")]
    NoReference { dir: PathBuf },
    #[error("Cannot read document directory {path}: {source}")]
    DocumentDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Listing page {page} failed: {source}")]
    ListingFetch {
        page: u32,
        #[source]
        source: ListingError,
    },
    #[error("Cannot resolve detail link {0}")]
    InvalidLink(String),
    #[error("Conversion of {link} failed: {source}")]
    Conversion {
        link: String,
        #[source]
        source: ConvertError,
    },
    #[error("Failed to extract {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Shelf the reference point is read from and conversions write to
    pub document_dir: PathBuf,
    /// Prefix for site-relative detail links
    pub source_base: String,
    /// Bound on concurrent conversions and metadata reads
    pub concurrency: usize,
}

/// Summary of one heal run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealReport {
    pub pages_fetched: u32,
    pub dirty: usize,
    pub updated: usize,
    pub failed: usize,
    pub snapshots: usize,
}

pub struct Crawler {
    index: Arc<IndexManager>,
    listing: Arc<dyn ListingSource>,
    converter: Arc<dyn Converter>,
    settings: CrawlSettings,
}

impl Crawler {
    pub fn new(
        index: Arc<IndexManager>,
        listing: Arc<dyn ListingSource>,
        converter: Arc<dyn Converter>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            index,
            listing,
            converter,
            settings,
        }
    }

    /// Bring the index up to date with the source listing.
    ///
    /// Must not run concurrently with itself; [`crate::schedule::HealJob`]
    /// guards against that.
    pub async fn heal_index(&self) -> Result<HealReport, CrawlError> {
        self.index.engine()?;

        let reference = self.reference_timestamp().await?;
        info!(%reference, "Checking listing for updated works");

        let report = self.scan(reference).await?;
        info!(
            pages = report.pages_fetched,
            dirty = report.dirty,
            updated = report.updated,
            failed = report.failed,
            "Heal finished"
        );
        Ok(report)
    }

    /// Newest last-update time on the shelf. Unreadable e-books are skipped.
    pub async fn reference_timestamp(&self) -> Result<DateTime<Utc>, CrawlError> {
        let dir = &self.settings.document_dir;
        let paths = extractor::list_books(dir).map_err(|source| CrawlError::DocumentDir {
            path: dir.clone(),
            source,
        })?;

        let mut newest: Option<DateTime<Utc>> = None;
        for (path, result) in
            extractor::extract_all(paths, self.settings.concurrency, extractor::read_book_info).await
        {
            match result {
                Ok(info) => newest = newest.max(info.last_update),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable e-book"),
            }
        }

        newest.ok_or_else(|| CrawlError::NoReference { dir: dir.clone() })
    }

    /// Walk listing pages from page 1 until one holds a clean entry or has
    /// nothing dirty. A failed page fetch ends the walk with an error; work
    /// already ingested on earlier pages stays in the index.
    pub async fn scan(&self, reference: DateTime<Utc>) -> Result<HealReport, CrawlError> {
        let mut report = HealReport::default();
        let mut page: u32 = 1;

        loop {
            let html = self
                .listing
                .fetch_page(page)
                .await
                .map_err(|source| CrawlError::ListingFetch { page, source })?;
            report.pages_fetched += 1;

            let entries = parse_listing(&html);
            let scan = classify(&entries, reference);
            debug!(
                page,
                entries = entries.len(),
                dirty = scan.dirty.len(),
                reached_clean = scan.reached_clean,
                "Listing page classified"
            );

            if scan.dirty.is_empty() {
                info!(page, "No updated works since last run");
                break;
            }

            info!(page, works = ?scan.dirty, "Updating dirty works");
            let updated = self.update_entries(&scan.dirty).await;
            report.dirty += scan.dirty.len();
            report.updated += updated;
            report.failed += scan.dirty.len() - updated;

            if updated > 0 && self.index.checkpoint()? {
                report.snapshots += 1;
            }

            if scan.reached_clean {
                break;
            }
            page += 1;
        }

        Ok(report)
    }

    /// Update every link, at most `concurrency` at a time. Failures are
    /// logged and skipped. Returns how many succeeded.
    pub async fn update_entries(&self, links: &[String]) -> usize {
        stream::iter(links.iter().cloned())
            .map(|link: String| async move {
                match self.update_entry(&link).await {
                    Ok(_) => true,
                    Err(e) => {
                        error!(link = %link, error = %e, "Skipping work");
                        false
                    }
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .fold(0, |done, ok| async move { done + usize::from(ok) })
            .await
    }

    /// Convert one work, extract it and add its chapters. Returns the
    /// number of chapters indexed.
    pub async fn update_entry(&self, link: &str) -> Result<usize, CrawlError> {
        let url = resolve_link(&self.settings.source_base, link)
            .ok_or_else(|| CrawlError::InvalidLink(link.to_string()))?;

        let path = self
            .converter
            .convert(&url)
            .await
            .map_err(|source| CrawlError::Conversion {
                link: link.to_string(),
                source,
            })?;

        let worker_path = path.clone();
        let book = tokio::task::spawn_blocking(move || extractor::extract_book(&worker_path))
            .await?
            .map_err(|source| CrawlError::Extract { path, source })?;

        let count = book.chapters.len();
        let title = book.info.title;
        let chapters = book.chapters;
        let index = self.index.clone();
        // Commits synchronously
        tokio::task::spawn_blocking(move || index.add_documents(&chapters)).await??;
        info!(title = %title, chapters = count, "Updated work");
        Ok(count)
    }
}
