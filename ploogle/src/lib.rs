//! Ploogle - chapter search over serialized fiction
//!
//! Indexes chapters of works converted from a source archive and serves
//! full-text search with per-story grouping, plus a random pick.
//!
//! # Architecture
//! - `extractor`: EPUB files -> books and chapters
//! - `indexer`: Tantivy engine over chapters, kept in RAM with disk snapshots
//! - `index`: Lifecycle owner of the engine and the URL pool
//! - `search`: Grouping, filtering and pagination of raw hits
//! - `listing` / `convert` / `crawler`: Incremental refresh from the source site
//! - `schedule`: Daily heal with a no-overlap guard
//! - `config`: Flags and `PLOOGLE_*` environment

pub mod config;
pub mod convert;
pub mod crawler;
pub mod extractor;
pub mod index;
pub mod indexer;
pub mod listing;
pub mod models;
pub mod schedule;
pub mod search;
pub mod timestamps;

pub use config::Config;
pub use convert::{ConvertError, Converter, FanFicFare};
pub use crawler::{CrawlError, CrawlSettings, Crawler, HealReport};
pub use index::{IndexError, IndexManager, IndexSettings, IndexState, InitError, InitMode};
pub use listing::{HttpListing, ListingError, ListingSource};
pub use models::*;
pub use schedule::{DailySchedule, HealJob};
pub use search::{SearchError, SearchService};
