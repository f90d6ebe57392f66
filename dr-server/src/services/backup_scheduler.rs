use crate::services::operations;
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    /// Run a full backup with the engine's default options on `cron_expression`.
    pub async fn schedule_backups(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                let options = state.engine.default_options();
                tracing::info!("Starting scheduled backup");
                // A run still in flight from the previous tick wins
                if let Err(e) = operations::spawn_backup(&state, Vec::new(), options) {
                    tracing::warn!("Skipping scheduled backup: {}", e);
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Backup schedule registered");
        Ok(())
    }

    /// Apply the retention policy daily, independent of backups.
    pub async fn schedule_prune(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                let policy = state.engine.retention_policy();
                match state.engine.retention().prune(&policy).await {
                    Ok(result) => tracing::info!(deleted = result.deleted_count(), "Scheduled prune finished"),
                    Err(e) => tracing::error!(error = %e, "Scheduled prune failed"),
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Prune schedule registered");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
