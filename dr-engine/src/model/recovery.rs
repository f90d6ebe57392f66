use super::{Domain, JobStatus, StageStatus};
use crate::utils::{DrError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ── RecoveryScope ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "domains", rename_all = "snake_case")]
pub enum RecoveryScope {
    Full,
    Domains(BTreeSet<Domain>),
}

impl RecoveryScope {
    pub fn includes(&self, domain: Domain) -> bool {
        match self {
            RecoveryScope::Full => true,
            RecoveryScope::Domains(set) => set.contains(&domain),
        }
    }

    /// Domains to restore, in restore order.
    pub fn ordered_domains(&self) -> Vec<Domain> {
        Domain::RESTORE_ORDER
            .into_iter()
            .filter(|d| self.includes(*d))
            .collect()
    }
}

impl FromStr for RecoveryScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("full") {
            return Ok(RecoveryScope::Full);
        }
        let domains = s
            .split(',')
            .map(str::parse::<Domain>)
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(RecoveryScope::Domains(domains))
    }
}

impl fmt::Display for RecoveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryScope::Full => f.write_str("full"),
            RecoveryScope::Domains(set) => {
                let names: Vec<&str> = set.iter().map(Domain::as_str).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

// ── RecoveryStage ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "domain", rename_all = "snake_case")]
pub enum RecoveryStage {
    Validate,
    Download,
    Decrypt,
    Decompress,
    Restore(Domain),
    Verify,
    RestartServices,
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStage::Validate => f.write_str("validate"),
            RecoveryStage::Download => f.write_str("download"),
            RecoveryStage::Decrypt => f.write_str("decrypt"),
            RecoveryStage::Decompress => f.write_str("decompress"),
            RecoveryStage::Restore(d) => write!(f, "restore:{d}"),
            RecoveryStage::Verify => f.write_str("verify"),
            RecoveryStage::RestartServices => f.write_str("restart_services"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStageResult {
    pub stage: RecoveryStage,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ── RecoveryJob ──

/// One run of the reverse pipeline. Immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryJob {
    pub id: String,
    pub backup_id: Option<String>,
    pub scope: RecoveryScope,
    /// `production`, or `sandbox:<id>` for drills.
    pub target: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<RecoveryStageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<RecoveryStage>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveryJob {
    pub fn new(id: String, backup_id: Option<String>, scope: RecoveryScope, target: String) -> Self {
        Self {
            id,
            backup_id,
            scope,
            target,
            status: JobStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            failed_stage: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn stage(&self, stage: RecoveryStage) -> Option<&RecoveryStageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Domains whose restore stage succeeded.
    pub fn restored_domains(&self) -> Vec<Domain> {
        self.stages
            .iter()
            .filter_map(|s| match (s.stage, s.status) {
                (RecoveryStage::Restore(d), StageStatus::Succeeded) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Convert a failed job into the error that halted it.
    pub fn into_result(self) -> Result<Self> {
        match (self.status, self.failed_stage) {
            (JobStatus::Completed, _) => Ok(self),
            (JobStatus::Cancelled, _) => Err(DrError::Cancelled),
            (_, Some(stage)) => Err(DrError::RecoveryStageFailure {
                stage: stage.to_string(),
                reason: self.error.unwrap_or_default(),
            }),
            (_, None) => Err(DrError::RecoveryStageFailure {
                stage: "unknown".into(),
                reason: self.error.unwrap_or_default(),
            }),
        }
    }

    pub(crate) fn finish(&mut self, status: JobStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }
}
