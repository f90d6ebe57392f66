//! Data model shared by the backup and recovery pipelines.

pub mod drill;
pub mod job;
pub mod manifest;
pub mod point;
pub mod recovery;

pub use drill::{DrillResult, DrillStatus, ProbeCheck};
pub use job::{
    ArtifactRef, BackupJob, BackupKind, ComponentResult, ComponentStatus, JobStatus, PipelineStage,
    StageOutcome, StageStatus, StoredForm,
};
pub use manifest::{Manifest, TransformRecord};
pub use point::{Location, RecoveryPoint};
pub use recovery::{RecoveryJob, RecoveryScope, RecoveryStage, RecoveryStageResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One independently backed-up slice of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Database,
    Files,
    Marketplace,
    Configuration,
}

impl Domain {
    /// Restore order. Later domains may reference state produced by earlier ones.
    pub const RESTORE_ORDER: [Domain; 4] = [
        Domain::Database,
        Domain::Files,
        Domain::Marketplace,
        Domain::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Database => "database",
            Domain::Files => "files",
            Domain::Marketplace => "marketplace",
            Domain::Configuration => "configuration",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "database" | "db" => Ok(Domain::Database),
            "files" => Ok(Domain::Files),
            "marketplace" | "marketplace-data" | "marketplace_data" => Ok(Domain::Marketplace),
            "configuration" | "config" => Ok(Domain::Configuration),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

/// Time-ordered, globally unique identifier with a readable prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::now_v7().simple())
}
