//! Recovery point registry and job history.
//!
//! The store is the single source of truth for which snapshots exist and
//! which are verified. Implementations serialise their writes so that a
//! prune racing a new backup's persistence cannot lose an update, and they
//! enforce the retention invariant themselves: the last verified point can
//! neither be removed nor demoted.

pub mod json;

pub use json::JsonPointStore;

use crate::model::{BackupJob, DrillResult, RecoveryJob, RecoveryPoint};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait RecoveryPointStore: Send + Sync {
    async fn insert(&self, point: RecoveryPoint) -> Result<()>;

    async fn get(&self, backup_id: &str) -> Result<Option<RecoveryPoint>>;

    /// All points, oldest first.
    async fn list(&self) -> Result<Vec<RecoveryPoint>>;

    async fn latest_verified(&self) -> Result<Option<RecoveryPoint>>;

    /// Demoting the last verified point fails with `RetentionInvariantViolation`.
    async fn set_verified(&self, backup_id: &str, verified: bool) -> Result<()>;

    /// Removing the last verified point fails with `RetentionInvariantViolation`.
    async fn remove(&self, backup_id: &str) -> Result<RecoveryPoint>;

    async fn record_backup(&self, job: &BackupJob) -> Result<()>;

    async fn record_recovery(&self, job: &RecoveryJob) -> Result<()>;

    async fn record_drill(&self, result: &DrillResult) -> Result<()>;

    async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupJob>>;

    async fn backups_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<BackupJob>>;

    async fn recoveries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RecoveryJob>>;

    async fn drills_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DrillResult>>;
}

/// Shared invariant check: would losing `backup_id`'s verified status leave
/// no verified point behind?
pub fn guard_last_verified<'a>(
    points: impl IntoIterator<Item = &'a RecoveryPoint>,
    backup_id: &str,
) -> Result<()> {
    let mut target_verified = false;
    let mut others_verified = 0usize;
    for point in points {
        if point.backup_id == backup_id {
            target_verified = point.verified;
        } else if point.verified {
            others_verified += 1;
        }
    }
    if target_verified && others_verified == 0 {
        return Err(DrError::RetentionInvariantViolation(backup_id.to_string()));
    }
    Ok(())
}
