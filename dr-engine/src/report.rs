//! Operational reports over the job history and the recovery point
//! registry: what ran, what failed, what is stored, and whether the RPO and
//! RTO targets currently hold.

use crate::config::EngineConfig;
use crate::fs::write_json_atomic;
use crate::model::{new_id, BackupJob, DrillResult, JobStatus, RecoveryJob, RecoveryPoint};
use crate::store::RecoveryPointStore;
use crate::utils::{DrError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

const SUCCESS_RATE_WARNING: f64 = 95.0;
/// A drill older than this no longer counts as evidence for the RTO.
const DRILL_STALENESS_DAYS: i64 = 30;

/// Report window: `<n>h`, `<n>d` or `<n>w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    amount: u32,
    unit: char,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        let n = i64::from(self.amount);
        match self.unit {
            'h' => Duration::hours(n),
            'w' => Duration::weeks(n),
            _ => Duration::days(n),
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self { amount: 30, unit: 'd' }
    }
}

impl FromStr for TimeRange {
    type Err = DrError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || DrError::Config(format!("invalid time range '{s}', expected e.g. 24h, 30d or 2w"));
        let unit = s.chars().last().ok_or_else(invalid)?.to_ascii_lowercase();
        if !matches!(unit, 'h' | 'd' | 'w') {
            return Err(invalid());
        }
        let amount: u32 = s[..s.len() - 1].parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }
        Ok(Self { amount, unit })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Completed with at least one failed domain or stage
    pub partial: usize,
    /// Completed share of all runs, in percent
    pub success_rate: f64,
    pub total_bytes: u64,
    pub average_duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub average_duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrillSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub last_passed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub points: usize,
    pub verified_points: usize,
    pub total_bytes: u64,
    /// Points with an off-site copy
    pub remote_points: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compliance {
    pub rpo_target_hours: f64,
    /// Age of the newest verified point
    pub hours_since_last_verified: Option<f64>,
    pub rpo_met: bool,
    pub rto_target_hours: f64,
    /// Recovery duration of the latest passed drill
    pub last_drill_recovery_hours: Option<f64>,
    /// `None` when no recent drill gives evidence either way
    pub rto_met: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub node_id: String,
    pub generated_at: DateTime<Utc>,
    pub range: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub backups: BackupSummary,
    pub recoveries: RecoverySummary,
    pub drills: DrillSummary,
    pub storage: StorageUsage,
    pub compliance: Compliance,
    pub recommendations: Vec<String>,
}

fn average(durations: impl Iterator<Item = u64>) -> u64 {
    let (sum, count) = durations.fold((0u64, 0u64), |(s, c), d| (s + d, c + 1));
    if count == 0 {
        0
    } else {
        sum / count
    }
}

fn hours(ms: u64) -> f64 {
    ms as f64 / 3_600_000.0
}

fn summarize_backups(jobs: &[BackupJob]) -> BackupSummary {
    let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
    let completed = count(JobStatus::Completed);
    BackupSummary {
        total: jobs.len(),
        completed,
        failed: count(JobStatus::Failed),
        cancelled: count(JobStatus::Cancelled),
        partial: jobs.iter().filter(|j| j.is_partial()).count(),
        success_rate: if jobs.is_empty() {
            0.0
        } else {
            completed as f64 * 100.0 / jobs.len() as f64
        },
        total_bytes: jobs.iter().map(|j| j.total_size).sum(),
        average_duration_ms: average(jobs.iter().map(|j| j.duration_ms)),
    }
}

fn summarize_recoveries(jobs: &[RecoveryJob]) -> RecoverySummary {
    RecoverySummary {
        total: jobs.len(),
        completed: jobs.iter().filter(|j| j.status == JobStatus::Completed).count(),
        failed: jobs.iter().filter(|j| j.status != JobStatus::Completed).count(),
        average_duration_ms: average(jobs.iter().map(|j| j.duration_ms)),
    }
}

fn summarize_drills(drills: &[DrillResult]) -> DrillSummary {
    DrillSummary {
        total: drills.len(),
        passed: drills.iter().filter(|d| d.passed()).count(),
        failed: drills.iter().filter(|d| !d.passed()).count(),
        last_passed_at: drills.iter().filter(|d| d.passed()).map(|d| d.finished_at).max(),
    }
}

fn storage_usage(points: &[RecoveryPoint]) -> StorageUsage {
    StorageUsage {
        points: points.len(),
        verified_points: points.iter().filter(|p| p.verified).count(),
        total_bytes: points.iter().map(|p| p.size).sum(),
        remote_points: points.iter().filter(|p| p.is_remote()).count(),
        oldest: points.iter().map(|p| p.created_at).min(),
        newest: points.iter().map(|p| p.created_at).max(),
    }
}

pub struct ReportGenerator {
    node_id: String,
    reports_dir: PathBuf,
    rpo_hours: f64,
    rto_hours: f64,
    store: Arc<dyn RecoveryPointStore>,
}

impl ReportGenerator {
    pub fn new(config: &EngineConfig, store: Arc<dyn RecoveryPointStore>) -> Self {
        Self {
            node_id: config.node_id.clone(),
            reports_dir: config.storage.reports_dir.clone(),
            rpo_hours: config.objectives.rpo_hours,
            rto_hours: config.objectives.rto_hours,
            store,
        }
    }

    /// Build a report over the trailing `range` and save it as
    /// `<reports dir>/<report id>.json`.
    pub async fn generate_report(&self, range: TimeRange) -> Result<Report> {
        let to = Utc::now();
        let from = to - range.duration();

        let backups = self.store.backups_between(from, to).await?;
        let recoveries = self.store.recoveries_between(from, to).await?;
        let drills = self.store.drills_between(from, to).await?;
        let points = self.store.list().await?;
        let recent_drills = self
            .store
            .drills_between(to - Duration::days(DRILL_STALENESS_DAYS), to)
            .await?;

        let mut report = Report {
            id: new_id("report"),
            node_id: self.node_id.clone(),
            generated_at: to,
            range: range.to_string(),
            from,
            to,
            backups: summarize_backups(&backups),
            recoveries: summarize_recoveries(&recoveries),
            drills: summarize_drills(&drills),
            storage: storage_usage(&points),
            compliance: self.compliance(&points, &recent_drills, to),
            recommendations: Vec::new(),
        };
        report.recommendations = recommendations(&report);

        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let path = self.reports_dir.join(format!("{}.json", report.id));
        write_json_atomic(&path, &report).await?;
        info!("Report {} written to {}", report.id, path.display());
        Ok(report)
    }

    fn compliance(&self, points: &[RecoveryPoint], drills: &[DrillResult], now: DateTime<Utc>) -> Compliance {
        let hours_since_last_verified = points
            .iter()
            .filter(|p| p.verified)
            .map(|p| p.created_at)
            .max()
            .map(|t| (now - t).num_milliseconds().max(0) as f64 / 3_600_000.0);

        let last_drill_recovery_hours = drills
            .iter()
            .filter(|d| d.passed())
            .max_by_key(|d| d.finished_at)
            .and_then(DrillResult::recovery_ms)
            .map(hours);

        Compliance {
            rpo_target_hours: self.rpo_hours,
            hours_since_last_verified,
            rpo_met: hours_since_last_verified.is_some_and(|h| h <= self.rpo_hours),
            rto_target_hours: self.rto_hours,
            last_drill_recovery_hours,
            rto_met: last_drill_recovery_hours.map(|h| h <= self.rto_hours),
        }
    }
}

fn recommendations(report: &Report) -> Vec<String> {
    let mut out = Vec::new();
    let b = &report.backups;
    let c = &report.compliance;

    if b.total == 0 {
        out.push(format!("No backups ran in the last {}; check that the scheduler is enabled", report.range));
    } else if b.success_rate < SUCCESS_RATE_WARNING {
        out.push(format!(
            "Backup success rate is {:.1}% ({} failed); investigate failing runs",
            b.success_rate, b.failed
        ));
    }
    if b.partial > 0 {
        out.push(format!("{} backup(s) completed with failed domains or stages", b.partial));
    }

    match c.hours_since_last_verified {
        None => out.push("No verified recovery point exists; run a verification pass or a drill".into()),
        Some(h) if !c.rpo_met => out.push(format!(
            "RPO target of {}h is not met (last verified point is {:.1}h old); increase backup frequency",
            c.rpo_target_hours, h
        )),
        Some(_) => {}
    }

    match c.rto_met {
        None => out.push(format!(
            "No passed recovery drill in the last {DRILL_STALENESS_DAYS} days; schedule one to confirm the RTO"
        )),
        Some(false) => out.push(format!(
            "Last drill recovery took {:.1}h, above the {}h RTO target",
            c.last_drill_recovery_hours.unwrap_or_default(),
            c.rto_target_hours
        )),
        Some(true) => {}
    }

    let s = &report.storage;
    if s.points > 0 && s.remote_points == 0 {
        out.push("No recovery point has an off-site copy; enable remote upload".into());
    }
    if s.points > s.verified_points {
        out.push(format!("{} recovery point(s) are unverified", s.points - s.verified_points));
    }
    out
}
