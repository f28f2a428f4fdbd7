//! Process configuration from command-line flags and `PLOOGLE_*` variables

use crate::crawler::CrawlSettings;
use crate::index::{IndexSettings, InitMode};
use crate::schedule::DailySchedule;
use crate::search::DEFAULT_PAGE_SIZE;
use clap::builder::FalseyValueParser;
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTING_URL: &str =
    "https://archiveofourown.org/tags/Human%20Domestication%20Guide%20-%20GlitchyRobo/works";
pub const DEFAULT_SOURCE_BASE: &str = "https://archiveofourown.org";

const DOCKER_INDEX_DIR: &str = "./index";
const DOCKER_FANFICFARE: &str = "/root/.local/share/pipx/venvs/fanficfare/bin/fanficfare";
const SNAPSHOT_DIR_NAME: &str = "searchindex";
const URL_POOL_FILE: &str = "urls.json";

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Build the index from the e-book directory instead of loading a snapshot
    #[arg(long, env = "PLOOGLE_CREATE_INDEX", value_parser = FalseyValueParser::new())]
    pub create_index: bool,

    /// Development mode: never write snapshots
    #[arg(long, env = "PLOOGLE_DEV", value_parser = FalseyValueParser::new())]
    pub dev: bool,

    /// Container layout: snapshots under ./index and the bundled FanFicFare
    #[arg(long, env = "PLOOGLE_DOCKER", value_parser = FalseyValueParser::new())]
    pub docker: bool,

    /// Directory for the snapshot artifacts; overrides the container layout
    #[arg(long, env = "PLOOGLE_INDEX_DIR")]
    pub index_dir: Option<PathBuf>,

    /// E-book directory; a leading `~` is the home directory
    #[arg(long, env = "PLOOGLE_DOCDIR", default_value = "./books")]
    pub docdir: String,

    #[arg(long, env = "PLOOGLE_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Run the daily heal
    #[arg(long, env = "PLOOGLE_CRAWLER_MODE", value_parser = FalseyValueParser::new())]
    pub crawler_mode: bool,

    /// Local time of the daily heal, `HH:MM`
    #[arg(long, env = "PLOOGLE_CRAWL_AT", default_value = "22:32")]
    pub crawl_at: DailySchedule,

    /// Run one heal right after startup
    #[arg(long, env = "PLOOGLE_INDEX_KNOWN_DIRTY", value_parser = FalseyValueParser::new())]
    pub index_known_dirty: bool,

    #[arg(long, env = "PLOOGLE_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    pub listing_url: String,

    /// Prefix for site-relative detail links
    #[arg(long, env = "PLOOGLE_SOURCE_BASE", default_value = DEFAULT_SOURCE_BASE)]
    pub source_base: String,

    /// FanFicFare executable
    #[arg(long, env = "PLOOGLE_FANFICFARE")]
    pub fanficfare: Option<String>,

    /// Worker bound for extraction and conversion [default: available parallelism]
    #[arg(long, env = "PLOOGLE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Give up on a conversion after this many seconds [default: wait forever]
    #[arg(long, env = "PLOOGLE_CONVERT_TIMEOUT_SECS")]
    pub convert_timeout_secs: Option<u64>,
}

impl Config {
    pub fn index_dir(&self) -> PathBuf {
        match (&self.index_dir, self.docker) {
            (Some(dir), _) => dir.clone(),
            (None, true) => PathBuf::from(DOCKER_INDEX_DIR),
            (None, false) => PathBuf::from("."),
        }
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.index_dir().join(SNAPSHOT_DIR_NAME)
    }

    pub fn url_pool_path(&self) -> PathBuf {
        self.index_dir().join(URL_POOL_FILE)
    }

    pub fn document_dir(&self) -> PathBuf {
        resolve_home(&self.docdir, std::env::var_os("HOME").map(PathBuf::from).as_deref())
    }

    pub fn init_mode(&self) -> InitMode {
        if self.create_index {
            InitMode::CreateFromScratch
        } else {
            InitMode::LoadFromSnapshot
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
            .filter(|n| *n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
    }

    pub fn fanficfare_program(&self) -> String {
        match (&self.fanficfare, self.docker) {
            (Some(program), _) => program.clone(),
            (None, true) => DOCKER_FANFICFARE.to_string(),
            (None, false) => "fanficfare".to_string(),
        }
    }

    pub fn convert_timeout(&self) -> Option<Duration> {
        self.convert_timeout_secs.map(Duration::from_secs)
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            snapshot_dir: self.snapshot_dir(),
            url_pool_path: self.url_pool_path(),
            document_dir: self.document_dir(),
            persist: !self.dev,
            concurrency: self.concurrency(),
        }
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            document_dir: self.document_dir(),
            source_base: self.source_base.clone(),
            concurrency: self.concurrency(),
        }
    }
}

/// Expand a leading `~` to `home`
fn resolve_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["ploogle"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).config
    }

    #[test]
    fn test_resolve_home() {
        let home = Path::new("/home/reader");
        assert_eq!(resolve_home("~/books", Some(home)), PathBuf::from("/home/reader/books"));
        assert_eq!(resolve_home("~", Some(home)), PathBuf::from("/home/reader"));
        assert_eq!(resolve_home("./books", Some(home)), PathBuf::from("./books"));
        assert_eq!(resolve_home("~/books", None), PathBuf::from("~/books"));
    }

    #[test]
    fn test_paths() {
        let plain = parse(&[]);
        assert_eq!(plain.snapshot_dir(), PathBuf::from("./searchindex"));
        assert_eq!(plain.url_pool_path(), PathBuf::from("./urls.json"));

        let docker = parse(&["--docker"]);
        assert_eq!(docker.snapshot_dir(), PathBuf::from("./index/searchindex"));
        assert_eq!(docker.url_pool_path(), PathBuf::from("./index/urls.json"));
        assert_eq!(docker.fanficfare_program(), DOCKER_FANFICFARE);

        let explicit = parse(&["--docker", "--index-dir", "/data"]);
        assert_eq!(explicit.snapshot_dir(), PathBuf::from("/data/searchindex"));
    }

    #[test]
    fn test_switches() {
        let config = parse(&["--create-index", "--dev", "--page-size", "5", "--crawl-at", "03:15"]);
        assert_eq!(config.init_mode(), InitMode::CreateFromScratch);
        assert!(!config.index_settings().persist);
        assert_eq!(config.page_size, 5);
        assert_eq!(config.crawl_at, "03:15".parse().unwrap());
        assert_eq!(parse(&[]).init_mode(), InitMode::LoadFromSnapshot);
        assert_eq!(parse(&[]).page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_concurrency() {
        assert_eq!(parse(&["--concurrency", "3"]).concurrency(), 3);
        assert!(parse(&["--concurrency", "0"]).concurrency() >= 1);
        assert_eq!(parse(&["--convert-timeout-secs", "60"]).convert_timeout(), Some(Duration::from_secs(60)));
    }
}
