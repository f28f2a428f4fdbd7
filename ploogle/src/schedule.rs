//! Daily heal scheduling
//!
//! A [`HealJob`] wraps the crawler with a try-lock so a heal that is still
//! running makes any further trigger a logged no-op. The daily loop and the
//! startup heal share one job.

use crate::crawler::{CrawlError, Crawler, HealReport};
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct HealJob {
    crawler: Crawler,
    running: Mutex<()>,
}

impl HealJob {
    pub fn new(crawler: Crawler) -> Self {
        Self {
            crawler,
            running: Mutex::new(()),
        }
    }

    /// Run one heal unless one is already in progress. `None` means the
    /// trigger was skipped.
    pub async fn trigger(&self) -> Option<Result<HealReport, CrawlError>> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Heal already running, skipping trigger");
            return None;
        };

        let result = self.crawler.heal_index().await;
        if let Err(e) = &result {
            error!(error = %e, "Heal aborted");
        }
        Some(result)
    }
}

/// A local wall-clock time at which to run once per day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub at: NaiveTime,
}

impl FromStr for DailySchedule {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            at: NaiveTime::parse_from_str(s.trim(), "%H:%M")?,
        })
    }
}

impl DailySchedule {
    /// The first run strictly after `now`, in `now`'s timezone
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let mut candidate = now.date_naive().and_time(self.at);
        if candidate <= now.naive_local() {
            candidate += Duration::days(1);
        }

        // A run time inside a DST gap moves to the first valid instant after it
        tz.from_local_datetime(&candidate)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(candidate + Duration::hours(1))).earliest())
            .unwrap_or_else(|| tz.from_utc_datetime(&candidate))
    }
}

/// Trigger `job` every day at `schedule` on the local clock. Never returns.
pub async fn run_daily(job: Arc<HealJob>, schedule: DailySchedule) {
    info!(at = %schedule.at, "Scheduled daily index heal");
    loop {
        let now = Local::now();
        let next = schedule.next_after(&now);
        let wait = (next.clone() - now).to_std().unwrap_or_default();
        info!(next = %next, "Next heal scheduled");

        tokio::time::sleep(wait).await;
        job.trigger().await;
    }
}
