//! Conversion of a work URL into a local e-book via FanFicFare

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

static SUCCESS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Successfully wrote '(.*)'").expect("valid regex"));

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No output file reported for {url} ({status})")]
    NoOutput { url: String, status: ExitStatus },
    #[error("Conversion of {url} timed out after {after:?}")]
    TimedOut { url: String, after: Duration },
}

/// Turns a work URL into an e-book file on disk
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns the path of the written file
    async fn convert(&self, url: &str) -> Result<PathBuf, ConvertError>;
}

/// The FanFicFare command line tool
#[derive(Debug, Clone)]
pub struct FanFicFare {
    pub program: String,
    /// Where the tool runs and writes its output
    pub work_dir: PathBuf,
    /// `None` waits for the tool however long it takes
    pub timeout: Option<Duration>,
}

impl FanFicFare {
    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-p", "-d", "--non-interactive", "--force", url])
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Converter for FanFicFare {
    async fn convert(&self, url: &str) -> Result<PathBuf, ConvertError> {
        debug!(program = %self.program, url, "Running conversion");

        let run = self.command(url).output();
        let result = match self.timeout {
            Some(after) => tokio::time::timeout(after, run)
                .await
                .map_err(|_| ConvertError::TimedOut {
                    url: url.to_string(),
                    after,
                })?,
            None => run.await,
        };
        let output = result.map_err(|source| ConvertError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        match written_filename(&stderr) {
            Some(name) => Ok(self.work_dir.join(name)),
            None => Err(ConvertError::NoOutput {
                url: url.to_string(),
                status: output.status,
            }),
        }
    }
}

/// File name from the tool's success line. The last one wins.
pub fn written_filename(diagnostics: &str) -> Option<String> {
    diagnostics
        .lines()
        .filter_map(|line| SUCCESS_MARKER.captures(line))
        .last()
        .map(|caps| caps[1].to_string())
        .filter(|name| !name.is_empty())
}
