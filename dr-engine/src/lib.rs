//! Disaster Recovery Engine Library
//!
//! Multi-domain backup and recovery pipeline: per-domain snapshots with
//! integrity checksums, compression, encryption and remote replication on
//! the way out; validated, fail-fast restores on the way back; retention
//! that never drops the last verified recovery point; drills and reports to
//! keep the RPO/RTO contract honest.

pub mod adapters;
pub mod backup;
pub mod config;
pub mod daemon;
pub mod drill;
pub mod engine;
pub mod fs;
pub mod integrity;
pub mod model;
pub mod notify;
pub mod recovery;
pub mod report;
pub mod retention;
pub mod schedule;
pub mod services;
pub mod storage;
pub mod store;
pub mod tools;
pub mod transform;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use backup::{BackupOptions, BackupOrchestrator};
pub use config::EngineConfig;
pub use engine::{Collaborators, Engine};
pub use recovery::RecoveryOrchestrator;
pub use utils::errors::DrError;
pub type Result<T> = std::result::Result<T, DrError>;
