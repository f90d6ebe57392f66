//! Recovery drills: rehearse a full recovery in an isolated sandbox.
//!
//! A drill provisions a sandbox, recovers into it, probes the result and
//! tears the sandbox down again. Production state is never touched. A
//! passing drill re-confirms the recovery point's verified flag; it is the
//! only path besides a verification pass that may do so.

use crate::adapters::{AdapterSet, RestoreTarget};
use crate::config::EngineConfig;
use crate::engine::Collaborators;
use crate::fs::remove_dir_if_exists;
use crate::fs::walker::{count_files, WalkOptions};
use crate::model::{
    new_id, DrillResult, DrillStatus, Domain, JobStatus, ProbeCheck, RecoveryJob, RecoveryScope,
    RecoveryStage, StageStatus,
};
use crate::notify::{deliver, EventKind, PipelineEvent};
use crate::recovery::RecoveryOrchestrator;
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[async_trait]
pub trait DrillEnvironment: Send + Sync {
    /// Create an isolated target for drill `drill_id`.
    async fn provision(&self, drill_id: &str) -> Result<RestoreTarget>;

    /// Functionality checks against the restored target.
    async fn probe(&self, target: &RestoreTarget, recovery: &RecoveryJob) -> Result<Vec<ProbeCheck>>;

    async fn teardown(&self, target: &RestoreTarget) -> Result<()>;
}

/// Sandboxes as directory trees under a common root. Teardown also asks
/// each adapter to discard what it restored elsewhere (sandbox databases).
#[derive(Clone)]
pub struct LocalSandbox {
    root: PathBuf,
    adapters: AdapterSet,
}

impl LocalSandbox {
    pub fn new(root: PathBuf, adapters: AdapterSet) -> Self {
        Self { root, adapters }
    }
}

fn sandbox_root(target: &RestoreTarget) -> Result<&Path> {
    match target {
        RestoreTarget::Sandbox { root, .. } => Ok(root),
        RestoreTarget::Production => Err(DrError::Config("drills never run against production".into())),
    }
}

/// Count `.json` documents under `dir` that parse.
async fn readable_documents(dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            let bytes = tokio::fs::read(&path).await?;
            if serde_json::from_slice::<serde_json::Value>(&bytes).is_ok() {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[async_trait]
impl DrillEnvironment for LocalSandbox {
    async fn provision(&self, drill_id: &str) -> Result<RestoreTarget> {
        let root = self.root.join(drill_id);
        tokio::fs::create_dir_all(&root).await?;
        info!("Provisioned sandbox {}", root.display());
        Ok(RestoreTarget::Sandbox {
            id: drill_id.to_string(),
            root,
        })
    }

    async fn probe(&self, target: &RestoreTarget, recovery: &RecoveryJob) -> Result<Vec<ProbeCheck>> {
        let root = sandbox_root(target)?;
        let mut checks = Vec::new();

        for domain in recovery.restored_domains() {
            let name = format!("{domain}_restored");
            let check = match domain {
                Domain::Database => {
                    let detail = recovery
                        .stage(RecoveryStage::Restore(domain))
                        .and_then(|s| s.detail.clone())
                        .unwrap_or_default();
                    ProbeCheck::pass(name, detail)
                }
                Domain::Files => {
                    let dir = root.join(Domain::Files.as_str());
                    let files = tokio::task::spawn_blocking(move || count_files(&dir, &WalkOptions::default()))
                        .await
                        .map_err(|e| DrError::tool(e.to_string()))?
                        .unwrap_or(0);
                    if files > 0 {
                        ProbeCheck::pass(name, format!("{files} file(s) present"))
                    } else {
                        ProbeCheck::fail(name, "no files restored")
                    }
                }
                Domain::Marketplace | Domain::Configuration => {
                    let docs = readable_documents(&root.join(domain.as_str())).await?;
                    if docs > 0 {
                        ProbeCheck::pass(name, format!("{docs} readable document(s)"))
                    } else {
                        ProbeCheck::fail(name, "no readable documents")
                    }
                }
            };
            checks.push(check);
        }

        let verified = recovery
            .stage(RecoveryStage::Verify)
            .is_some_and(|s| s.status == StageStatus::Succeeded);
        checks.push(if verified {
            ProbeCheck::pass("post_restore_verification", "integrity checks passed")
        } else {
            ProbeCheck::fail("post_restore_verification", "verify stage did not succeed")
        });
        Ok(checks)
    }

    async fn teardown(&self, target: &RestoreTarget) -> Result<()> {
        let root = sandbox_root(target)?;
        let mut first_error = None;
        for adapter in self.adapters.values() {
            if let Err(e) = adapter.discard_sandbox(target).await {
                first_error.get_or_insert(e);
            }
        }
        remove_dir_if_exists(root).await?;
        info!("Removed sandbox {}", root.display());
        first_error.map_or(Ok(()), Err)
    }
}

pub struct DrillRunner {
    node_id: String,
    rto_ms: u64,
    deps: Collaborators,
    recovery: Arc<RecoveryOrchestrator>,
    environment: Arc<dyn DrillEnvironment>,
}

impl DrillRunner {
    pub fn new(
        config: &EngineConfig,
        deps: Collaborators,
        recovery: Arc<RecoveryOrchestrator>,
        environment: Arc<dyn DrillEnvironment>,
    ) -> Self {
        Self {
            node_id: config.node_id.clone(),
            rto_ms: (config.objectives.rto_hours * 3_600_000.0).max(0.0) as u64,
            deps,
            recovery,
            environment,
        }
    }

    /// Rehearse a full recovery of `backup_id` (or the latest verified
    /// point). Every outcome, including a failure to start, is returned as
    /// a recorded [`DrillResult`].
    pub async fn run_drill(&self, backup_id: Option<&str>) -> Result<DrillResult> {
        let id = new_id("drill");
        let started_at = Utc::now();
        info!("Starting recovery drill {}", id);

        let mut result = DrillResult {
            id: id.clone(),
            backup_id: backup_id.map(str::to_string),
            started_at,
            finished_at: started_at,
            recovery: None,
            checks: Vec::new(),
            status: DrillStatus::Failed,
            error: None,
            rto_met: false,
        };

        match self.environment.provision(&id).await {
            Ok(target) => {
                if let Err(e) = self.rehearse(&mut result, backup_id, &target).await {
                    result.error = Some(e.to_string());
                }
                if let Err(e) = self.environment.teardown(&target).await {
                    warn!("Drill {}: sandbox teardown failed: {}", id, e);
                }
            }
            Err(e) => result.error = Some(format!("sandbox provisioning failed: {e}")),
        }

        result.finished_at = Utc::now();
        if result.passed() {
            if let Some(backup_id) = &result.backup_id {
                self.deps.store.set_verified(backup_id, true).await?;
            }
            info!(
                "Drill {} passed in {}ms (RTO met: {})",
                id,
                result.duration_ms(),
                result.rto_met
            );
        } else {
            error!("Drill {} failed: {}", id, result.error.as_deref().unwrap_or("probe failed"));
        }

        if let Err(e) = self.deps.store.record_drill(&result).await {
            warn!("Failed to record drill {}: {}", id, e);
        }
        self.notify(&result).await;
        Ok(result)
    }

    async fn rehearse(&self, result: &mut DrillResult, backup_id: Option<&str>, target: &RestoreTarget) -> Result<()> {
        let recovery = self
            .recovery
            .recover(backup_id, RecoveryScope::Full, target.clone())
            .await?;
        result.backup_id = recovery.backup_id.clone();
        result.rto_met = recovery.status == JobStatus::Completed && recovery.duration_ms <= self.rto_ms;

        if recovery.status != JobStatus::Completed {
            result.error = recovery.error.clone();
            result.recovery = Some(recovery);
            return Ok(());
        }

        let checks = self.environment.probe(target, &recovery).await?;
        result.recovery = Some(recovery);
        if checks.iter().all(|c| c.passed) {
            result.status = DrillStatus::Passed;
        } else {
            let failed: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect();
            result.error = Some(format!("probe checks failed: {}", failed.join(", ")));
        }
        result.checks = checks;
        Ok(())
    }

    async fn notify(&self, result: &DrillResult) {
        let kind = if result.passed() {
            EventKind::DrillCompleted
        } else {
            EventKind::DrillFailed
        };
        let mut event = PipelineEvent::new(kind, &self.node_id, &result.id);
        event.backup_id = result.backup_id.clone();
        event.status = result.status.to_string();
        event.duration_ms = result.duration_ms();
        event.error = result.error.clone();
        if result.passed() && !result.rto_met {
            event.warnings.push("recovery exceeded the RTO target".into());
        }
        deliver(self.deps.notifier.as_ref(), &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupOptions;
    use crate::testing::Fixture;
    use crate::store::RecoveryPointStore;

    fn runner(fx: &Fixture) -> DrillRunner {
        let recovery = Arc::new(fx.recovery_orchestrator());
        let environment = Arc::new(LocalSandbox::new(
            fx.config.drill.sandbox_root.clone(),
            fx.collaborators().adapters,
        ));
        DrillRunner::new(&fx.config, fx.collaborators(), recovery, environment)
    }

    #[tokio::test]
    async fn test_passing_drill_confirms_point() {
        let fx = Fixture::new().await;
        let options = BackupOptions {
            verification: false,
            ..BackupOptions::default()
        };
        let job = fx.backup_orchestrator().run_full_backup(&[], &options).await.unwrap();
        std::fs::write(fx.site_dir().join("index.php"), b"live").unwrap();

        let result = runner(&fx).run_drill(Some(&job.id)).await.unwrap();

        assert!(result.passed(), "{:?}", result.error);
        assert!(result.rto_met);
        assert!(result.checks.iter().all(|c| c.passed));
        assert_eq!(result.recovery.as_ref().unwrap().status, JobStatus::Completed);
        assert!(fx.store.get(&job.id).await.unwrap().unwrap().verified);

        // production untouched, sandbox gone
        assert_eq!(std::fs::read(fx.site_dir().join("index.php")).unwrap(), b"live");
        assert!(fx.dump.restored().iter().all(|db| db.starts_with("shop_drill_")));
        // the sandbox database does not outlive the drill
        assert_eq!(fx.dump.dropped(), vec![format!("shop_{}", result.id)]);
        assert_eq!(fx.services.restarts(), 0);
        assert!(!fx.config.drill.sandbox_root.join(&result.id).exists());

        let history = fx
            .store
            .drills_between(result.started_at - chrono::Duration::seconds(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(fx.notifier.kinds().last(), Some(&EventKind::DrillCompleted));
    }

    #[tokio::test]
    async fn test_drill_without_points_fails() {
        let fx = Fixture::new().await;
        let result = runner(&fx).run_drill(None).await.unwrap();

        assert!(!result.passed());
        assert!(result.recovery.is_none());
        assert!(result.error.unwrap().contains("No verified recovery point"));
        assert_eq!(fx.notifier.kinds().last(), Some(&EventKind::DrillFailed));
    }

    #[tokio::test]
    async fn test_failed_recovery_does_not_promote() {
        let fx = Fixture::new().await;
        let options = BackupOptions {
            verification: false,
            ..BackupOptions::default()
        };
        let job = fx.backup_orchestrator().run_full_backup(&[], &options).await.unwrap();
        let victim = job.components[&Domain::Database].artifacts[0].stored_path().to_string();
        std::fs::write(fx.config.storage.root.join(&job.id).join(victim), b"garbage").unwrap();

        let result = runner(&fx).run_drill(Some(&job.id)).await.unwrap();

        assert!(!result.passed());
        assert_eq!(result.recovery.unwrap().failed_stage, Some(RecoveryStage::Validate));
        assert!(!fx.store.get(&job.id).await.unwrap().unwrap().verified);
    }
}
