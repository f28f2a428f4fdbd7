//! Index lifecycle: the one owner of the engine and the URL pool
//!
//! The manager is built once per process and shared behind an `Arc`. It moves
//! through `Uninitialized -> Building | Loading -> Ready`; writes are accepted
//! while building or ready, reads only once ready.
//!
//! Snapshots are two artifacts, the engine directory and a JSON list of URLs.
//! Each is written beside its final path and renamed into place, but the pair
//! is not committed together: a crash between the two writes leaves them from
//! different points in time. Readers of the files during a save may also see
//! the old engine directory briefly missing.

use crate::extractor::{self, ExtractError};
use crate::indexer::{Indexer, IndexerError};
use crate::models::Chapter;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Readiness of the shared index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Uninitialized,
    Building,
    Loading,
    Ready,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Building => "building",
            IndexState::Loading => "loading",
            IndexState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// How the index is brought up at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    CreateFromScratch,
    LoadFromSnapshot,
}

/// Paths and knobs the manager needs
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Directory holding the engine snapshot
    pub snapshot_dir: PathBuf,
    /// JSON file holding the URL pool
    pub url_pool_path: PathBuf,
    /// E-book files a from-scratch build reads
    pub document_dir: PathBuf,
    /// Write snapshots to disk; off in development
    pub persist: bool,
    /// Extraction worker bound
    pub concurrency: usize,
}

/// Error type for index operations after startup
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index is not ready (state: {0})")]
    NotReady(IndexState),
    #[error("Engine error: {0}")]
    Engine(#[from] IndexerError),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("URL pool error: {0}")]
    UrlPool(#[from] serde_json::Error),
}

/// Startup failure. The process must not serve a partial index after one.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Index already initialized (state: {0})")]
    AlreadyInitialized(IndexState),
    #[error("Cannot read document directory {path}: {source}")]
    DocumentDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to extract {path}: {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type IndexResult<T> = Result<T, IndexError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> IndexError + '_ {
    move |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Owner of the engine instance and the URL pool
pub struct IndexManager {
    settings: IndexSettings,
    engine: OnceCell<Indexer>,
    state: RwLock<IndexState>,
    urls: RwLock<HashSet<String>>,
}

impl IndexManager {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            settings,
            engine: OnceCell::new(),
            state: RwLock::new(IndexState::Uninitialized),
            urls: RwLock::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Ready
    }

    /// Bring the index up. Runs at most once; a failure leaves the manager
    /// unusable and is meant to end the process.
    pub async fn initialize(&self, mode: InitMode) -> Result<(), InitError> {
        {
            let mut state = self.state.write();
            if *state != IndexState::Uninitialized {
                return Err(InitError::AlreadyInitialized(*state));
            }
            *state = match mode {
                InitMode::CreateFromScratch => IndexState::Building,
                InitMode::LoadFromSnapshot => IndexState::Loading,
            };
        }

        match mode {
            InitMode::CreateFromScratch => self.build().await?,
            InitMode::LoadFromSnapshot => self.load().await?,
        }

        *self.state.write() = IndexState::Ready;
        info!(
            chapters = self.engine.get().map(Indexer::num_docs).unwrap_or(0),
            urls = self.url_count(),
            "Index ready"
        );

        if mode == InitMode::CreateFromScratch {
            self.checkpoint()?;
        }
        Ok(())
    }

    async fn build(&self) -> Result<(), InitError> {
        let dir = &self.settings.document_dir;
        info!(dir = %dir.display(), "Building index from scratch");

        let paths = extractor::list_books(dir).map_err(|source| InitError::DocumentDir {
            path: dir.clone(),
            source,
        })?;
        let book_count = paths.len();

        let mut chapters = Vec::new();
        let mut work_urls = Vec::with_capacity(book_count);
        for (path, result) in
            extractor::extract_all(paths, self.settings.concurrency, extractor::extract_book).await
        {
            let book = result.map_err(|source| InitError::Extraction { path, source })?;
            work_urls.push(book.info.url);
            chapters.extend(book.chapters);
        }

        let engine = Indexer::new_in_memory().map_err(IndexError::from)?;
        // Chapter URL overrides stay out of the pool so each work is one entry
        engine.add_documents(&chapters).map_err(IndexError::from)?;
        self.urls.write().extend(work_urls);
        // Only `initialize` sets the engine, and it runs once
        let _ = self.engine.set(engine);

        info!(books = book_count, chapters = chapters.len(), "Index built");
        Ok(())
    }

    async fn load(&self) -> Result<(), InitError> {
        let snapshot_dir = self.settings.snapshot_dir.clone();
        info!(dir = %snapshot_dir.display(), "Loading index snapshot");

        let engine = tokio::task::spawn_blocking(move || Indexer::open_snapshot(&snapshot_dir))
            .await
            .map_err(|e| IndexError::Engine(IndexerError::Io(std::io::Error::other(e))))?
            .map_err(IndexError::from)?;

        let path = &self.settings.url_pool_path;
        let raw = std::fs::read(path).map_err(io_error(path))?;
        let urls: Vec<String> = serde_json::from_slice(&raw).map_err(IndexError::from)?;

        *self.urls.write() = urls.into_iter().collect();
        let _ = self.engine.set(engine);
        Ok(())
    }

    fn writable_engine(&self) -> IndexResult<&Indexer> {
        let state = self.state();
        match (state, self.engine.get()) {
            (IndexState::Building | IndexState::Ready, Some(engine)) => Ok(engine),
            _ => Err(IndexError::NotReady(state)),
        }
    }

    /// The engine, once the index is ready to serve
    pub fn engine(&self) -> IndexResult<&Indexer> {
        let state = self.state();
        match (state, self.engine.get()) {
            (IndexState::Ready, Some(engine)) => Ok(engine),
            _ => Err(IndexError::NotReady(state)),
        }
    }

    /// Add chapters, replacing earlier copies, and record their URLs
    pub fn add_documents(&self, chapters: &[Chapter]) -> IndexResult<()> {
        let engine = self.writable_engine()?;
        engine.add_documents(chapters)?;

        self.urls.write().extend(chapters.iter().map(|c| c.url.clone()));
        Ok(())
    }

    pub fn add_url(&self, url: &str) -> IndexResult<()> {
        self.writable_engine()?;
        self.urls.write().insert(url.to_string());
        Ok(())
    }

    /// Uniformly random URL from the pool
    pub fn random_url(&self) -> Option<String> {
        self.urls.read().iter().choose(&mut rand::thread_rng()).cloned()
    }

    pub fn url_count(&self) -> usize {
        self.urls.read().len()
    }

    /// Write both artifacts, regardless of the persistence setting
    pub fn save_snapshot(&self) -> IndexResult<()> {
        let engine = self.engine()?;

        let target = &self.settings.snapshot_dir;
        let staging = sibling(target, "tmp");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(io_error(&staging))?;
        }
        std::fs::create_dir_all(&staging).map_err(io_error(&staging))?;
        engine.persist_to(&staging)?;
        replace_dir(&staging, target)?;

        let mut urls: Vec<String> = self.urls.read().iter().cloned().collect();
        urls.sort();
        let json = serde_json::to_vec(&urls)?;
        write_file(&self.settings.url_pool_path, &json)?;

        info!(
            snapshot = %target.display(),
            urls = urls.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Save a snapshot if persistence is enabled. Returns whether one was written.
    pub fn checkpoint(&self) -> IndexResult<bool> {
        if !self.settings.persist {
            debug!("Persistence disabled, skipping snapshot");
            return Ok(false);
        }
        self.save_snapshot()?;
        Ok(true)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Move `staging` to `target`, replacing whatever was there
fn replace_dir(staging: &Path, target: &Path) -> IndexResult<()> {
    let old = sibling(target, "old");
    if old.exists() {
        std::fs::remove_dir_all(&old).map_err(io_error(&old))?;
    }
    if target.exists() {
        std::fs::rename(target, &old).map_err(io_error(target))?;
    }
    std::fs::rename(staging, target).map_err(io_error(target))?;
    if old.exists() {
        std::fs::remove_dir_all(&old).map_err(io_error(&old))?;
    }
    Ok(())
}

/// Write through a temporary sibling so readers never see a torn file
fn write_file(path: &Path, bytes: &[u8]) -> IndexResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp = sibling(path, "tmp");
    std::fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_error(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path, persist: bool) -> IndexSettings {
        IndexSettings {
            snapshot_dir: root.join("searchindex"),
            url_pool_path: root.join("urls.json"),
            document_dir: root.join("books"),
            persist,
            concurrency: 2,
        }
    }

    fn chapter(book: &str, section: &str, url: &str) -> Chapter {
        Chapter {
            id: Chapter::compose_id(book, section),
            book_id: book.to_string(),
            title: format!("Book {}", book),
            chapter: 0,
            chapter_title: "Summary".to_string(),
            author: "anon".to_string(),
            url: url.to_string(),
            chapter_text: "some text".to_string(),
            chapter_notes: None,
        }
    }

    #[test]
    fn test_sibling_paths() {
        assert_eq!(sibling(Path::new("/a/searchindex"), "tmp"), PathBuf::from("/a/searchindex.tmp"));
        assert_eq!(sibling(Path::new("urls.json"), "tmp"), PathBuf::from("urls.json.tmp"));
    }

    #[test]
    fn test_writes_rejected_before_init() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(settings(dir.path(), false));

        assert_eq!(manager.state(), IndexState::Uninitialized);
        assert!(matches!(
            manager.add_documents(&[chapter("1", "a", "https://example.org/1")]),
            Err(IndexError::NotReady(IndexState::Uninitialized))
        ));
        assert!(matches!(manager.add_url("https://example.org/1"), Err(IndexError::NotReady(_))));
        assert!(matches!(manager.engine(), Err(IndexError::NotReady(_))));
        assert!(matches!(manager.save_snapshot(), Err(IndexError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_build_from_empty_shelf() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("books")).unwrap();
        let manager = IndexManager::new(settings(dir.path(), false));

        manager.initialize(InitMode::CreateFromScratch).await.unwrap();

        assert!(manager.is_ready());
        assert_eq!(manager.engine().unwrap().num_docs(), 0);
        assert_eq!(manager.random_url(), None);
        // Development mode writes nothing
        assert!(!dir.path().join("searchindex").exists());
    }

    #[tokio::test]
    async fn test_missing_document_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(settings(dir.path(), true));

        let err = manager.initialize(InitMode::CreateFromScratch).await.unwrap_err();
        assert!(matches!(err, InitError::DocumentDir { .. }));
        assert!(!manager.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("books")).unwrap();
        let manager = IndexManager::new(settings(dir.path(), false));

        manager.initialize(InitMode::CreateFromScratch).await.unwrap();
        let err = manager.initialize(InitMode::LoadFromSnapshot).await.unwrap_err();
        assert!(matches!(err, InitError::AlreadyInitialized(IndexState::Ready)));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(settings(dir.path(), true));

        assert!(manager.initialize(InitMode::LoadFromSnapshot).await.is_err());
        assert_eq!(manager.state(), IndexState::Loading);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_with_url_pool() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("books")).unwrap();

        let manager = IndexManager::new(settings(dir.path(), true));
        manager.initialize(InitMode::CreateFromScratch).await.unwrap();
        manager
            .add_documents(&[
                chapter("1", "a", "https://example.org/1"),
                chapter("1", "b", "https://example.org/1"),
                chapter("2", "a", "https://example.org/2"),
            ])
            .unwrap();
        manager.add_url("https://example.org/3").unwrap();
        assert_eq!(manager.url_count(), 3);
        assert!(manager.checkpoint().unwrap());

        // A second save replaces the first
        manager.save_snapshot().unwrap();
        assert!(!dir.path().join("searchindex.tmp").exists());
        assert!(!dir.path().join("searchindex.old").exists());

        let json = std::fs::read_to_string(dir.path().join("urls.json")).unwrap();
        let urls: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(
            urls,
            vec!["https://example.org/1", "https://example.org/2", "https://example.org/3"]
        );

        let loaded = IndexManager::new(settings(dir.path(), true));
        loaded.initialize(InitMode::LoadFromSnapshot).await.unwrap();
        assert_eq!(loaded.engine().unwrap().num_docs(), 3);
        assert_eq!(loaded.url_count(), 3);
        assert!(loaded.random_url().unwrap().starts_with("https://example.org/"));
    }

    #[tokio::test]
    async fn test_checkpoint_respects_persist_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("books")).unwrap();
        let manager = IndexManager::new(settings(dir.path(), false));
        manager.initialize(InitMode::CreateFromScratch).await.unwrap();

        assert!(!manager.checkpoint().unwrap());
        assert!(!dir.path().join("urls.json").exists());
    }
}
