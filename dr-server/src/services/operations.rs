//! Background execution of backups, recoveries and drills.
//!
//! Each `spawn_*` call validates what it can up front, so the caller gets a
//! synchronous 4xx, then runs the operation in a task that holds the
//! operation guard until it finishes.

use crate::error::AppError;
use crate::state::{AppState, Operation};
use dr_engine::adapters::RestoreTarget;
use dr_engine::model::{Domain, JobStatus, RecoveryScope};
use dr_engine::BackupOptions;
use std::sync::Arc;

pub fn spawn_backup(state: &Arc<AppState>, domains: Vec<Domain>, options: BackupOptions) -> Result<(), AppError> {
    let backups = state.engine.backups();
    backups.check_request(&domains, &options)?;
    let guard = state.begin(Operation::Backup)?;

    tokio::spawn(async move {
        match backups.run_full_backup_cancellable(&domains, &options, guard.token()).await {
            Ok(job) if job.status == JobStatus::Completed => {
                tracing::info!(backup_id = %job.id, verified = job.verified, "Backup finished");
            }
            Ok(job) => {
                tracing::warn!(
                    backup_id = %job.id,
                    status = %job.status,
                    error = job.error.as_deref().unwrap_or(""),
                    "Backup did not complete"
                );
            }
            Err(e) => tracing::error!("Backup could not start: {}", e),
        }
        drop(guard);
    });
    Ok(())
}

pub async fn spawn_recovery(
    state: &Arc<AppState>,
    backup_id: Option<String>,
    scope: RecoveryScope,
    target: RestoreTarget,
) -> Result<String, AppError> {
    let recoveries = state.engine.recoveries();
    let point = recoveries.resolve(backup_id.as_deref()).await?;
    let guard = state.begin(Operation::Recovery)?;
    let backup_id = point.backup_id.clone();

    tokio::spawn(async move {
        match recoveries
            .recover_cancellable(Some(&point.backup_id), scope, target, guard.token())
            .await
        {
            Ok(job) => tracing::info!(
                recovery_id = %job.id,
                backup_id = %point.backup_id,
                status = %job.status,
                "Recovery finished"
            ),
            Err(e) => tracing::error!(backup_id = %point.backup_id, "Recovery could not start: {}", e),
        }
        drop(guard);
    });
    Ok(backup_id)
}

pub async fn spawn_drill(state: &Arc<AppState>, backup_id: Option<String>) -> Result<String, AppError> {
    let point = state.engine.recoveries().resolve(backup_id.as_deref()).await?;
    let guard = state.begin(Operation::Drill)?;
    let drills = state.engine.drills();
    let backup_id = point.backup_id.clone();

    tokio::spawn(async move {
        match drills.run_drill(Some(&point.backup_id)).await {
            Ok(result) => tracing::info!(
                drill_id = %result.id,
                status = %result.status,
                rto_met = result.rto_met,
                "Drill finished"
            ),
            Err(e) => tracing::error!(backup_id = %point.backup_id, "Drill could not run: {}", e),
        }
        drop(guard);
    });
    Ok(backup_id)
}
