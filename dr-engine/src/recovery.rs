//! Reverse pipeline: validate → download → decrypt → decompress →
//! restore (per domain) → verify → restart services.
//!
//! Recovery is fail-fast. The first failing stage halts the job, is recorded
//! as `failed_stage`, and no later stage runs; in particular nothing is
//! restored unless every artifact in scope decoded to its recorded content
//! checksum. Decoding happens in `<work dir>/<recovery id>/`, never in the
//! backup's own directory, and the staging area is removed at the end.

use crate::adapters::{ComponentAdapter, DecodedArtifact, RestoreReport, RestoreTarget};
use crate::config::{EngineConfig, PipelineConfig};
use crate::engine::Collaborators;
use crate::fs::remove_dir_if_exists;
use crate::integrity::{checksum_file, IntegrityVerifier};
use crate::model::{
    new_id, ArtifactRef, Domain, JobStatus, Manifest, RecoveryJob, RecoveryPoint, RecoveryStage,
    RecoveryStageResult, StageStatus,
};
use crate::notify::{deliver, EventKind, PipelineEvent};
use crate::storage::fetch_manifest;
use crate::transform::{decompress_file, decrypt_file, without_suffix, COMPRESSED_SUFFIX, ENCRYPTED_SUFFIX};
use crate::utils::{DrError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use crate::model::RecoveryScope;

/// One artifact on its way from stored form back to content.
#[derive(Debug, Clone)]
struct Staged {
    domain: Domain,
    artifact: ArtifactRef,
    /// Current form on disk
    file: PathBuf,
    /// Relative path of the current form, suffixes and all
    form: String,
    download: bool,
}

struct Plan {
    manifest: Manifest,
    domains: Vec<Domain>,
    artifacts: Vec<Staged>,
}

impl Plan {
    fn decoded(&self, domain: Domain) -> Vec<DecodedArtifact> {
        self.artifacts
            .iter()
            .filter(|s| s.domain == domain)
            .map(|s| DecodedArtifact {
                artifact: s.artifact.clone(),
                file: s.file.clone(),
            })
            .collect()
    }
}

pub struct RecoveryOrchestrator {
    node_id: String,
    work_dir: PathBuf,
    pipeline: PipelineConfig,
    deps: Collaborators,
    verifier: IntegrityVerifier,
}

impl RecoveryOrchestrator {
    pub fn new(config: &EngineConfig, deps: Collaborators) -> Self {
        Self {
            node_id: config.node_id.clone(),
            work_dir: config.storage.work_dir.clone(),
            pipeline: config.pipeline.clone(),
            deps,
            verifier: IntegrityVerifier::new(),
        }
    }

    pub async fn recover(
        &self,
        backup_id: Option<&str>,
        scope: RecoveryScope,
        target: RestoreTarget,
    ) -> Result<RecoveryJob> {
        self.recover_cancellable(backup_id, scope, target, CancellationToken::new())
            .await
    }

    /// Restore `scope` from `backup_id`, or from the latest verified point.
    ///
    /// Point resolution errors are returned directly. Once a job exists,
    /// stage failures are reported through its status; use
    /// [`RecoveryJob::into_result`] to turn them into an error.
    pub async fn recover_cancellable(
        &self,
        backup_id: Option<&str>,
        scope: RecoveryScope,
        target: RestoreTarget,
        cancel: CancellationToken,
    ) -> Result<RecoveryJob> {
        let point = self.resolve(backup_id).await?;
        let mut job = RecoveryJob::new(
            new_id("recovery"),
            Some(point.backup_id.clone()),
            scope.clone(),
            target.to_string(),
        );
        let staging = self.work_dir.join(&job.id);
        info!(
            "Starting recovery {} from {} (scope: {}, target: {})",
            job.id, point.backup_id, scope, target
        );

        self.run(&mut job, &point, &scope, &target, &staging, &cancel).await;

        if let Err(e) = remove_dir_if_exists(&staging).await {
            warn!("Failed to remove staging area {}: {}", staging.display(), e);
        }

        let status = if job.failed_stage.is_none() {
            JobStatus::Completed
        } else if cancel.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        job.finish(status);
        match job.status {
            JobStatus::Completed => info!("Recovery {} completed in {}ms", job.id, job.duration_ms),
            _ => error!(
                "Recovery {} {} at stage {}: {}",
                job.id,
                job.status,
                job.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
                job.error.as_deref().unwrap_or("")
            ),
        }

        if let Err(e) = self.deps.store.record_recovery(&job).await {
            warn!("Failed to record recovery history for {}: {}", job.id, e);
        }
        self.notify(&job).await;
        Ok(job)
    }

    /// The named point, or the latest verified one.
    pub async fn resolve(&self, backup_id: Option<&str>) -> Result<RecoveryPoint> {
        match backup_id {
            Some(id) => {
                let point = self
                    .deps
                    .store
                    .get(id)
                    .await?
                    .ok_or_else(|| DrError::RecoveryPointNotFound(id.to_string()))?;
                if !point.verified {
                    warn!("Recovering from unverified point {}", id);
                }
                Ok(point)
            }
            None => self
                .deps
                .store
                .latest_verified()
                .await?
                .ok_or(DrError::NoRecoveryPointAvailable),
        }
    }

    /// Runs the stages in order; returns at the first failure.
    async fn run(
        &self,
        job: &mut RecoveryJob,
        point: &RecoveryPoint,
        scope: &RecoveryScope,
        target: &RestoreTarget,
        staging: &Path,
        cancel: &CancellationToken,
    ) {
        let Some(mut plan) = self
            .stage(job, RecoveryStage::Validate, cancel, self.validate(point, scope, staging))
            .await
        else {
            return;
        };

        if plan.artifacts.iter().any(|s| s.download) {
            if self
                .stage(job, RecoveryStage::Download, cancel, self.download(&mut plan, staging))
                .await
                .is_none()
            {
                return;
            }
        } else {
            skip(job, RecoveryStage::Download, "all artifacts available locally");
        }

        let transforms = plan.manifest.transforms.clone();
        if transforms.encrypted {
            let verify_content = !transforms.compressed;
            if self
                .stage(job, RecoveryStage::Decrypt, cancel, self.decrypt(&mut plan, staging, verify_content))
                .await
                .is_none()
            {
                return;
            }
        } else {
            skip(job, RecoveryStage::Decrypt, "backup is not encrypted");
        }

        if transforms.compressed {
            if self
                .stage(job, RecoveryStage::Decompress, cancel, self.decompress(&mut plan, staging))
                .await
                .is_none()
            {
                return;
            }
        } else {
            skip(job, RecoveryStage::Decompress, "backup is not compressed");
        }

        let mut reports = Vec::with_capacity(plan.domains.len());
        for domain in plan.domains.clone() {
            let decoded = plan.decoded(domain);
            let Some(report) = self
                .stage(job, RecoveryStage::Restore(domain), cancel, self.restore(domain, decoded, target))
                .await
            else {
                return;
            };
            reports.push(report);
        }

        if self
            .stage(job, RecoveryStage::Verify, cancel, self.verify(&plan, &reports, target))
            .await
            .is_none()
        {
            return;
        }

        if target.is_sandbox() {
            skip(job, RecoveryStage::RestartServices, "sandbox target");
        } else {
            let services = self.deps.services.clone();
            let restart = async move {
                let restarted = services.restart(target).await?;
                Ok::<_, DrError>(((), format!("{} service(s) restarted", restarted.len())))
            };
            self.stage(job, RecoveryStage::RestartServices, cancel, restart).await;
        }
    }

    /// Run one stage under the timeout and cancellation token, recording
    /// its outcome. `None` means the stage failed and the job must stop.
    async fn stage<T>(
        &self,
        job: &mut RecoveryJob,
        stage: RecoveryStage,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<(T, String)>>,
    ) -> Option<T> {
        let started = Instant::now();
        let timeout = self.pipeline.stage_timeout();
        debug!("Recovery {}: running stage {}", job.id, stage);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(DrError::Cancelled),
            outcome = tokio::time::timeout(timeout, work) => outcome.unwrap_or_else(|_| Err(DrError::Timeout {
                what: format!("{stage} stage"),
                secs: timeout.as_secs(),
            })),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((value, detail)) => {
                info!("Recovery {}: stage {} done ({})", job.id, stage, detail);
                job.stages.push(RecoveryStageResult {
                    stage,
                    status: StageStatus::Succeeded,
                    detail: Some(detail),
                    error: None,
                    duration_ms,
                });
                Some(value)
            }
            Err(e) => {
                error!("Recovery {}: stage {} failed: {}", job.id, stage, e);
                job.stages.push(RecoveryStageResult {
                    stage,
                    status: StageStatus::Failed,
                    detail: None,
                    error: Some(e.to_string()),
                    duration_ms,
                });
                job.failed_stage = Some(stage);
                job.error = Some(e.to_string());
                None
            }
        }
    }

    // ── Stages ──

    async fn validate(&self, point: &RecoveryPoint, scope: &RecoveryScope, staging: &Path) -> Result<(Plan, String)> {
        tokio::fs::create_dir_all(staging).await?;
        let manifest = fetch_manifest(point, self.deps.remote.as_deref(), staging).await?;

        let domains: Vec<Domain> = match scope {
            RecoveryScope::Full => Domain::RESTORE_ORDER
                .into_iter()
                .filter(|d| manifest.domains.contains_key(d))
                .collect(),
            RecoveryScope::Domains(_) => {
                let requested = scope.ordered_domains();
                for domain in &requested {
                    if manifest.failed_domains.contains(domain) {
                        return Err(stage_error(
                            RecoveryStage::Validate,
                            format!("domain {domain} failed during backup {}", manifest.backup_id),
                        ));
                    }
                    if !manifest.domains.contains_key(domain) {
                        return Err(stage_error(
                            RecoveryStage::Validate,
                            format!("domain {domain} is not part of backup {}", manifest.backup_id),
                        ));
                    }
                }
                requested
            }
        };
        if domains.is_empty() {
            return Err(stage_error(RecoveryStage::Validate, "nothing to restore"));
        }
        for domain in &domains {
            if !self.deps.adapters.contains_key(domain) {
                return Err(stage_error(
                    RecoveryStage::Validate,
                    format!("no adapter configured for domain {domain}"),
                ));
            }
        }

        let local_dir = point.local_dir().map(PathBuf::from);
        let mut artifacts = Vec::new();
        for domain in &domains {
            for artifact in manifest.domains.get(domain).into_iter().flatten() {
                let form = artifact.stored_path().to_string();
                let local = local_dir.as_ref().map(|d| d.join(&form));
                let intact = match &local {
                    Some(path) => matches!(checksum_file(path).await, Ok(sum) if sum == artifact.stored_checksum()),
                    None => false,
                };

                let download = if intact {
                    false
                } else if artifact.remote_key.is_some() && self.deps.remote.is_some() {
                    warn!("Local copy of {} missing or damaged; will download", form);
                    true
                } else {
                    return Err(stage_error(
                        RecoveryStage::Validate,
                        format!("artifact {form} is missing or damaged and has no remote copy"),
                    ));
                };

                artifacts.push(Staged {
                    domain: *domain,
                    artifact: artifact.clone(),
                    file: match local {
                        Some(path) if intact => path,
                        _ => staging.join(&form),
                    },
                    form,
                    download,
                });
            }
        }

        let pending = artifacts.iter().filter(|s| s.download).count();
        let detail = format!("{} artifact(s) in {} domain(s), {} to download", artifacts.len(), domains.len(), pending);
        Ok((Plan { manifest, domains, artifacts }, detail))
    }

    async fn download(&self, plan: &mut Plan, staging: &Path) -> Result<((), String)> {
        let remote = self
            .deps
            .remote
            .clone()
            .ok_or_else(|| DrError::storage("no remote storage configured"))?;
        let mut count = 0usize;
        for staged in plan.artifacts.iter_mut().filter(|s| s.download) {
            let key = staged
                .artifact
                .remote_key
                .clone()
                .ok_or_else(|| DrError::storage(format!("{} has no remote key", staged.form)))?;
            let dest = staging.join(&staged.form);
            remote.download(&key, &dest).await?;
            let actual = checksum_file(&dest).await?;
            if actual != staged.artifact.stored_checksum() {
                return Err(stage_error(
                    RecoveryStage::Download,
                    format!("downloaded {key} does not match its recorded checksum"),
                ));
            }
            staged.file = dest;
            count += 1;
        }
        Ok(((), format!("{count} artifact(s) fetched from {}", remote.describe())))
    }

    async fn decrypt(&self, plan: &mut Plan, staging: &Path, verify_content: bool) -> Result<((), String)> {
        let cipher = self
            .deps
            .cipher
            .clone()
            .ok_or_else(|| DrError::Crypto("backup is encrypted but no key is configured".into()))?;
        if let Some(expected) = &plan.manifest.transforms.cipher {
            if expected != cipher.name() {
                return Err(DrError::Crypto(format!(
                    "backup was encrypted with {expected}, configured cipher is {}",
                    cipher.name()
                )));
            }
        }
        self.decode(plan, staging, ENCRYPTED_SUFFIX, verify_content, |src, dest| {
            let cipher = cipher.clone();
            async move { decrypt_file(cipher, &src, &dest).await }
        })
        .await?;
        Ok(((), format!("{} artifact(s) decrypted", plan.artifacts.len())))
    }

    async fn decompress(&self, plan: &mut Plan, staging: &Path) -> Result<((), String)> {
        self.decode(plan, staging, COMPRESSED_SUFFIX, true, |src, dest| async move {
            decompress_file(&src, &dest).await
        })
        .await?;
        Ok(((), format!("{} artifact(s) decompressed", plan.artifacts.len())))
    }

    /// Strip one transform from every artifact into the staging area.
    async fn decode<F, Fut>(
        &self,
        plan: &mut Plan,
        staging: &Path,
        suffix: &str,
        verify_content: bool,
        apply: F,
    ) -> Result<()>
    where
        F: Fn(PathBuf, PathBuf) -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        for staged in plan.artifacts.iter_mut() {
            let decoded = without_suffix(&staged.form, suffix)
                .ok_or_else(|| DrError::storage(format!("{} does not end in {suffix}", staged.form)))?
                .to_string();
            let dest = staging.join(&decoded);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            apply(staged.file.clone(), dest.clone()).await?;
            if verify_content {
                let actual = checksum_file(&dest).await?;
                if actual != staged.artifact.checksum {
                    return Err(DrError::Crypto(format!(
                        "decoded {} does not match its content checksum",
                        staged.artifact.path
                    )));
                }
            }
            // Intermediates in staging are ours to drop; the backup directory is not
            if staged.file.starts_with(staging) {
                let _ = tokio::fs::remove_file(&staged.file).await;
            }
            staged.file = dest;
            staged.form = decoded;
        }
        Ok(())
    }

    async fn restore(
        &self,
        domain: Domain,
        decoded: Vec<DecodedArtifact>,
        target: &RestoreTarget,
    ) -> Result<(RestoreReport, String)> {
        let adapter: Arc<dyn ComponentAdapter> = self
            .deps
            .adapters
            .get(&domain)
            .cloned()
            .ok_or_else(|| stage_error(RecoveryStage::Restore(domain), "no adapter configured"))?;
        let report = adapter.restore(&decoded, target).await?;
        let detail = report.summary();
        Ok((report, detail))
    }

    async fn verify(&self, plan: &Plan, reports: &[RestoreReport], target: &RestoreTarget) -> Result<((), String)> {
        for report in reports {
            if let Some(adapter) = self.deps.adapters.get(&report.domain) {
                adapter.verify_restore(report, target).await?;
            }
        }

        let files: Vec<(PathBuf, String)> = plan
            .artifacts
            .iter()
            .map(|s| (s.file.clone(), s.artifact.checksum.clone()))
            .collect();
        let result = self.verifier.verify_files(&files).await;
        if !result.passed {
            return Err(DrError::VerificationFailure {
                backup_id: plan.manifest.backup_id.clone(),
                failed: result.failed_count(),
            });
        }
        Ok(((), format!("{} domain(s), {} artifact(s) verified", reports.len(), files.len())))
    }

    async fn notify(&self, job: &RecoveryJob) {
        let kind = if job.status == JobStatus::Completed {
            EventKind::RecoveryCompleted
        } else {
            EventKind::RecoveryFailed
        };
        let mut event = PipelineEvent::new(kind, &self.node_id, &job.id);
        event.backup_id = job.backup_id.clone();
        event.status = job.status.to_string();
        event.duration_ms = job.duration_ms;
        event.error = job.error.clone();
        if let Some(stage) = job.failed_stage {
            event.warnings.push(format!("failed at stage {stage}"));
        }
        deliver(self.deps.notifier.as_ref(), &event).await;
    }
}

fn skip(job: &mut RecoveryJob, stage: RecoveryStage, reason: &str) {
    debug!("Recovery {}: skipping {} ({})", job.id, stage, reason);
    job.stages.push(RecoveryStageResult {
        stage,
        status: StageStatus::Skipped,
        detail: Some(reason.to_string()),
        error: None,
        duration_ms: 0,
    });
}

fn stage_error(stage: RecoveryStage, reason: impl Into<String>) -> DrError {
    DrError::RecoveryStageFailure {
        stage: stage.to_string(),
        reason: reason.into(),
    }
}
