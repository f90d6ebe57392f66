//! Backup scheduling.
//!
//! Runs are anchored to wall-clock boundaries in UTC: the top of the next
//! hour, 02:00 daily, or 02:00 on Sundays.

use crate::backup::{BackupOptions, BackupOrchestrator};
use crate::model::BackupJob;
use crate::utils::DrError;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RUN_HOUR: i64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleInterval {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl ScheduleInterval {
    /// First scheduled run strictly after `after`.
    pub fn next_run(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = Utc.from_utc_datetime(&after.date_naive().and_time(NaiveTime::MIN));
        let candidate = match self {
            ScheduleInterval::Hourly => midnight + Duration::hours(i64::from(after.hour()) + 1),
            ScheduleInterval::Daily => midnight + Duration::hours(RUN_HOUR),
            ScheduleInterval::Weekly => {
                let to_sunday = (7 - after.weekday().num_days_from_sunday()) % 7;
                midnight + Duration::days(i64::from(to_sunday)) + Duration::hours(RUN_HOUR)
            }
        };
        if candidate > after {
            return candidate;
        }
        match self {
            ScheduleInterval::Hourly => candidate + Duration::hours(1),
            ScheduleInterval::Daily => candidate + Duration::days(1),
            ScheduleInterval::Weekly => candidate + Duration::weeks(1),
        }
    }

    /// Equivalent six-field cron expression (seconds first).
    pub fn cron_expression(&self) -> &'static str {
        match self {
            ScheduleInterval::Hourly => "0 0 * * * *",
            ScheduleInterval::Daily => "0 0 2 * * *",
            ScheduleInterval::Weekly => "0 0 2 * * Sun",
        }
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScheduleInterval::Hourly => "hourly",
            ScheduleInterval::Daily => "daily",
            ScheduleInterval::Weekly => "weekly",
        })
    }
}

impl FromStr for ScheduleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(ScheduleInterval::Hourly),
            "daily" => Ok(ScheduleInterval::Daily),
            "weekly" => Ok(ScheduleInterval::Weekly),
            other => Err(format!("unknown schedule interval '{other}'")),
        }
    }
}

/// Background loop triggering full backups with the default domain set.
pub struct Scheduler {
    interval: ScheduleInterval,
    backup: Arc<BackupOrchestrator>,
    options: BackupOptions,
}

impl Scheduler {
    pub fn new(interval: ScheduleInterval, backup: Arc<BackupOrchestrator>, options: BackupOptions) -> Self {
        Self {
            interval,
            backup,
            options,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("Backup scheduler started ({})", self.interval);
        loop {
            let now = Utc::now();
            let next = self.interval.next_run(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next scheduled backup at {}", next.to_rfc3339());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.tick(&cancel).await;
        }
        info!("Backup scheduler stopped");
    }

    /// Run one scheduled backup. A run already in flight skips the tick.
    pub async fn tick(&self, cancel: &CancellationToken) -> Option<BackupJob> {
        match self
            .backup
            .run_full_backup_cancellable(&[], &self.options, cancel.child_token())
            .await
        {
            Ok(job) => {
                info!("Scheduled backup {} finished: {}", job.id, job.status);
                Some(job)
            }
            Err(DrError::BackupInProgress(holder)) => {
                warn!("Skipping scheduled backup: {} is still running", holder);
                None
            }
            Err(e) => {
                error!("Scheduled backup could not start: {}", e);
                None
            }
        }
    }
}
