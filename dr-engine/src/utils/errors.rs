//! Error types for the recovery engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrError {
    #[error("Backup of domain {domain} failed: {reason}")]
    DomainBackupFailure { domain: String, reason: String },

    #[error("Manifest creation failed: {0}")]
    ManifestCreationFailure(String),

    #[error("Verification failed for {backup_id}: {failed} artifact(s) did not match")]
    VerificationFailure { backup_id: String, failed: usize },

    #[error("Pipeline stage {stage} failed: {reason}")]
    StageFailure { stage: String, reason: String },

    #[error("Recovery stage {stage} failed: {reason}")]
    RecoveryStageFailure { stage: String, reason: String },

    #[error("No verified recovery point available")]
    NoRecoveryPointAvailable,

    #[error("Recovery point not found: {0}")]
    RecoveryPointNotFound(String),

    #[error("Refusing to delete {0}: it is the last verified recovery point")]
    RetentionInvariantViolation(String),

    #[error("A backup is already in progress (lease held by {0})")]
    BackupInProgress(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DrError {
    pub fn tool(msg: impl Into<String>) -> Self {
        DrError::Tool(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        DrError::Storage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DrError>;
