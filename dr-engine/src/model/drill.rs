use super::RecoveryJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillStatus {
    Passed,
    Failed,
}

impl fmt::Display for DrillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DrillStatus::Passed => "passed",
            DrillStatus::Failed => "failed",
        })
    }
}

/// One functionality check run against a restored sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeCheck {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { name: name.into(), passed: true, detail: Some(detail.into()) }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { name: name.into(), passed: false, detail: Some(detail.into()) }
    }
}

/// Outcome of a recovery rehearsal against an isolated environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillResult {
    pub id: String,
    pub backup_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryJob>,
    #[serde(default)]
    pub checks: Vec<ProbeCheck>,
    pub status: DrillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the rehearsed recovery finished within the RTO target.
    pub rto_met: bool,
}

impl DrillResult {
    pub fn passed(&self) -> bool {
        self.status == DrillStatus::Passed
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Duration of the recovery itself, excluding provisioning and probes.
    pub fn recovery_ms(&self) -> Option<u64> {
        self.recovery.as_ref().map(|r| r.duration_ms)
    }
}
