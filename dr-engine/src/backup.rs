//! Forward pipeline: collect → manifest → verify → compress → encrypt →
//! upload → persist → prune → notify.
//!
//! Domains run concurrently and fail independently. Everything after the
//! manifest runs to completion: a failing stage is recorded in the job and
//! the pipeline moves on with the artifacts in their last good form. Only a
//! manifest failure (no domain produced anything) or cancellation stops the
//! job early, and neither leaves a recovery point behind.

use crate::adapters::{AdapterSet, BackupContext, ComponentAdapter};
use crate::config::{EngineConfig, PipelineConfig};
use crate::engine::Collaborators;
use crate::fs::remove_dir_if_exists;
use crate::integrity::{checksum_file, ChecksumTarget, IntegrityVerifier, VerificationResult};
use crate::model::manifest::MANIFEST_FILE;
use crate::model::{
    new_id, BackupJob, BackupKind, ComponentResult, Domain, JobStatus, Location, Manifest, PipelineStage,
    RecoveryPoint, StageOutcome, StoredForm,
};
use crate::notify::{deliver, EventKind, PipelineEvent};
use crate::retention::{RetentionManager, RetentionPolicy};
use crate::storage::{fetch_manifest, object_key};
use crate::transform::{compress_file, encrypt_file, with_suffix, Cipher, COMPRESSED_SUFFIX, ENCRYPTED_SUFFIX};
use crate::utils::{DrError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LEASE_FILE: &str = ".backup.lease";

/// Which forward stages run. Each is independently togglable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    pub compression: bool,
    pub compression_level: i32,
    pub encryption: bool,
    pub remote_upload: bool,
    pub verification: bool,
}

impl From<&PipelineConfig> for BackupOptions {
    fn from(pipeline: &PipelineConfig) -> Self {
        Self {
            compression: pipeline.compression,
            compression_level: pipeline.compression_level,
            encryption: pipeline.encryption,
            remote_upload: pipeline.remote_upload,
            verification: pipeline.verification,
        }
    }
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

// ── Lease ──

/// "One backup in flight" lock, held as a file under the artifact root so
/// it also excludes other processes sharing the root.
struct BackupLease {
    path: PathBuf,
}

impl BackupLease {
    async fn acquire(root: &Path, holder: &str, ttl: Duration) -> Result<Self> {
        let path = root.join(LEASE_FILE);
        for _ in 0..2 {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(mut file) => {
                    file.write_all(holder.as_bytes()).await?;
                    file.sync_all().await?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let age = tokio::fs::metadata(&path)
                        .await
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| SystemTime::now().duration_since(t).ok())
                        .unwrap_or_default();
                    if age <= ttl {
                        let current = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                        return Err(DrError::BackupInProgress(current.trim().to_string()));
                    }
                    warn!("Taking over stale backup lease ({}s old)", age.as_secs());
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DrError::BackupInProgress("unknown".into()))
    }
}

impl Drop for BackupLease {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release backup lease: {}", e);
        }
    }
}

// ── Transforms ──

enum Transform {
    Compress(i32),
    Encrypt(Arc<dyn Cipher>),
}

impl Transform {
    fn suffix(&self) -> &'static str {
        match self {
            Transform::Compress(_) => COMPRESSED_SUFFIX,
            Transform::Encrypt(_) => ENCRYPTED_SUFFIX,
        }
    }

    async fn apply(&self, src: &Path, dest: &Path) -> Result<u64> {
        match self {
            Transform::Compress(level) => compress_file(src, dest, *level).await,
            Transform::Encrypt(cipher) => encrypt_file(cipher.clone(), src, dest).await,
        }
    }
}

// ── Orchestrator ──

pub struct BackupOrchestrator {
    node_id: String,
    root: PathBuf,
    work_dir: PathBuf,
    pipeline: PipelineConfig,
    policy: RetentionPolicy,
    deps: Collaborators,
    retention: Arc<RetentionManager>,
    verifier: IntegrityVerifier,
}

impl BackupOrchestrator {
    pub fn new(config: &EngineConfig, deps: Collaborators, retention: Arc<RetentionManager>) -> Self {
        Self {
            node_id: config.node_id.clone(),
            root: config.storage.root.clone(),
            work_dir: config.storage.work_dir.clone(),
            pipeline: config.pipeline.clone(),
            policy: RetentionPolicy::from(&config.retention),
            deps,
            retention,
            verifier: IntegrityVerifier::new(),
        }
    }

    /// Domains with a registered adapter, in restore order.
    pub fn default_domains(&self) -> Vec<Domain> {
        self.deps.adapters.keys().copied().collect()
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.deps.adapters
    }

    pub async fn run_full_backup(&self, domains: &[Domain], options: &BackupOptions) -> Result<BackupJob> {
        self.run_full_backup_cancellable(domains, options, CancellationToken::new())
            .await
    }

    /// Run the forward pipeline. `Err` only when the job could not start
    /// (lease held, unknown domain, bad options); every outcome after that
    /// is reported through the returned job's status.
    pub async fn run_full_backup_cancellable(
        &self,
        domains: &[Domain],
        options: &BackupOptions,
        cancel: CancellationToken,
    ) -> Result<BackupJob> {
        let selected = self.check_request(domains, options)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let id = new_id("backup");
        let ttl = Duration::from_secs(self.pipeline.lease_ttl_secs);
        let _lease = BackupLease::acquire(&self.root, &id, ttl).await?;

        let kind = if selected.len() == self.deps.adapters.len() {
            BackupKind::Full
        } else {
            BackupKind::Scoped(selected.iter().map(|a| a.domain()).collect())
        };
        let mut job = BackupJob::new(id, kind);
        let job_dir = self.root.join(&job.id);
        tokio::fs::create_dir_all(&job_dir).await?;

        info!("Starting backup {} ({} domain(s))", job.id, selected.len());
        let mut started = PipelineEvent::new(EventKind::BackupStarted, &self.node_id, &job.id);
        started.status = job.status.to_string();
        deliver(self.deps.notifier.as_ref(), &started).await;

        job.components = self.collect(&job.id, &job_dir, selected, &cancel).await;
        if cancel.is_cancelled() {
            return Ok(self.abandon(job, &job_dir, None).await);
        }

        let mut manifest = match Manifest::from_job(&job) {
            Ok(manifest) => manifest,
            Err(e) => return Ok(self.fail(job, &job_dir, e).await),
        };
        let manifest_path = job_dir.join(MANIFEST_FILE);
        if let Err(e) = manifest.save(&manifest_path).await {
            return Ok(self.fail(job, &job_dir, DrError::ManifestCreationFailure(e.to_string())).await);
        }
        job.manifest_path = Some(manifest_path.to_string_lossy().into_owned());

        // Verify raw content before any transform touches it
        let content_ok = if options.verification {
            match self.staged(PipelineStage::Verify, &cancel, self.verify_content(&job_dir, &manifest)).await {
                Ok(result) if result.passed => {
                    job.stages.push(StageOutcome::succeeded(PipelineStage::Verify));
                    true
                }
                Ok(result) => {
                    let e = DrError::VerificationFailure {
                        backup_id: job.id.clone(),
                        failed: result.failed_count(),
                    };
                    error!("{}", e);
                    job.stages.push(StageOutcome::failed(PipelineStage::Verify, e.to_string()));
                    false
                }
                Err(DrError::Cancelled) => return Ok(self.abandon(job, &job_dir, Some(&manifest)).await),
                Err(e) => {
                    job.stages.push(StageOutcome::failed(PipelineStage::Verify, e.to_string()));
                    false
                }
            }
        } else {
            debug!("Verification disabled for {}", job.id);
            job.stages.push(StageOutcome::skipped(PipelineStage::Verify));
            false
        };
        job.verified = content_ok && job.failed_domains().is_empty();

        let transforms = [
            (PipelineStage::Compress, options.compression.then_some(Transform::Compress(options.compression_level))),
            (
                PipelineStage::Encrypt,
                if options.encryption {
                    self.deps.cipher.clone().map(Transform::Encrypt)
                } else {
                    None
                },
            ),
        ];
        for (stage, transform) in transforms {
            let Some(transform) = transform else {
                debug!("Stage {} skipped for {}", stage, job.id);
                job.stages.push(StageOutcome::skipped(stage));
                continue;
            };
            match self.staged(stage, &cancel, self.transform(&mut manifest, &job_dir, &transform)).await {
                Ok(()) => {
                    match &transform {
                        Transform::Compress(_) => manifest.transforms.compressed = true,
                        Transform::Encrypt(cipher) => {
                            manifest.transforms.encrypted = true;
                            manifest.transforms.cipher = Some(cipher.name().to_string());
                        }
                    }
                    job.stages.push(StageOutcome::succeeded(stage));
                }
                Err(DrError::Cancelled) => return Ok(self.abandon(job, &job_dir, Some(&manifest)).await),
                Err(e) => {
                    error!("Stage {} failed for {}: {}", stage, job.id, e);
                    job.stages.push(StageOutcome::failed(stage, e.to_string()));
                }
            }
        }

        if options.remote_upload {
            match self.staged(PipelineStage::Upload, &cancel, self.upload(&mut manifest, &job_dir)).await {
                Ok(()) => job.stages.push(StageOutcome::succeeded(PipelineStage::Upload)),
                Err(DrError::Cancelled) => return Ok(self.abandon(job, &job_dir, Some(&manifest)).await),
                Err(e) => {
                    error!("Stage upload failed for {}: {}", job.id, e);
                    job.stages.push(StageOutcome::failed(PipelineStage::Upload, e.to_string()));
                }
            }
        } else {
            job.stages.push(StageOutcome::skipped(PipelineStage::Upload));
        }

        if let Err(e) = manifest.save(&manifest_path).await {
            error!("Failed to rewrite manifest for {}: {}", job.id, e);
        }
        self.sync_components(&mut job, &manifest);

        if cancel.is_cancelled() {
            return Ok(self.abandon(job, &job_dir, Some(&manifest)).await);
        }

        // Past this point the artifacts are complete; cancellation no longer applies
        let point = RecoveryPoint {
            backup_id: job.id.clone(),
            created_at: job.started_at,
            verified: job.verified,
            size: manifest.stored_size(),
            locations: locations(&job_dir, &manifest),
            domains: manifest.domains.keys().copied().collect(),
        };
        match self.deps.store.insert(point).await {
            Ok(()) => job.stages.push(StageOutcome::succeeded(PipelineStage::Persist)),
            Err(e) => {
                error!("Failed to persist recovery point {}: {}", job.id, e);
                job.stages.push(StageOutcome::failed(PipelineStage::Persist, e.to_string()));
            }
        }

        match self.retention.prune(&self.policy).await {
            Ok(result) if result.errors.is_empty() => {
                job.stages.push(StageOutcome::succeeded(PipelineStage::Prune))
            }
            Ok(result) => job
                .stages
                .push(StageOutcome::failed(PipelineStage::Prune, result.errors.join("; "))),
            Err(e) => job.stages.push(StageOutcome::failed(PipelineStage::Prune, e.to_string())),
        }

        job.finish(JobStatus::Completed);
        info!(
            "Backup {} completed in {}ms (verified: {}, partial: {})",
            job.id,
            job.duration_ms,
            job.verified,
            job.is_partial()
        );
        self.record_and_notify(&job).await;
        Ok(job)
    }

    /// A later verification pass over the stored forms. Promotes the point
    /// to verified when every artifact matches and no domain failed;
    /// demotes it on mismatch unless it is the last verified point.
    pub async fn reverify(&self, backup_id: &str) -> Result<VerificationResult> {
        let point = self
            .deps
            .store
            .get(backup_id)
            .await?
            .ok_or_else(|| DrError::RecoveryPointNotFound(backup_id.to_string()))?;
        let scratch = self.work_dir.join(format!("reverify-{backup_id}"));
        let result = self.reverify_in(&point, &scratch).await;
        let _ = remove_dir_if_exists(&scratch).await;
        let (result, domains_ok) = result?;

        if result.passed && domains_ok {
            if !point.verified {
                self.deps.store.set_verified(backup_id, true).await?;
                info!("Recovery point {} promoted to verified", backup_id);
            }
        } else if point.verified {
            match self.deps.store.set_verified(backup_id, false).await {
                Ok(()) => warn!("Recovery point {} demoted: verification failed", backup_id),
                Err(DrError::RetentionInvariantViolation(_)) => {
                    error!("Recovery point {} failed verification but is the last verified point", backup_id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    async fn reverify_in(&self, point: &RecoveryPoint, scratch: &Path) -> Result<(VerificationResult, bool)> {
        tokio::fs::create_dir_all(scratch).await?;
        let remote = self.deps.remote.as_deref();
        let manifest = fetch_manifest(point, remote, scratch).await?;

        let mut files = Vec::new();
        for artifact in manifest.artifacts() {
            let local = point.local_dir().map(|d| Path::new(d).join(artifact.stored_path()));
            let local_present = match &local {
                Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
                None => false,
            };
            let path = match (local, &artifact.remote_key, remote) {
                (Some(local), _, _) if local_present => local,
                (_, Some(key), Some(remote)) => {
                    let dest = scratch.join(artifact.stored_path());
                    if let Err(e) = remote.download(key, &dest).await {
                        warn!("Could not fetch {} for verification: {}", key, e);
                    }
                    dest
                }
                (local, _, _) => local.unwrap_or_else(|| scratch.join(artifact.stored_path())),
            };
            files.push((path, artifact.stored_checksum().to_string()));
        }

        let mut result = self.verifier.verify_files(&files).await;
        // Replicated artifacts must also still exist remotely
        if let Some(remote) = remote {
            for artifact in manifest.artifacts() {
                if let Some(key) = &artifact.remote_key {
                    if !remote.exists(key).await.unwrap_or(false) {
                        result.checks.push(crate::integrity::ArtifactCheck {
                            path: key.clone(),
                            expected: artifact.stored_checksum().to_string(),
                            actual: None,
                            passed: false,
                            error: Some("missing from remote storage".into()),
                        });
                        result.passed = false;
                    }
                }
            }
        }
        Ok((result, manifest.failed_domains.is_empty()))
    }

    /// Reject a request that could not start: unknown domains, or stages
    /// enabled without the collaborator they need.
    pub fn check_request(&self, domains: &[Domain], options: &BackupOptions) -> Result<Vec<Arc<dyn ComponentAdapter>>> {
        let selected = self.select_adapters(domains)?;
        if options.encryption && self.deps.cipher.is_none() {
            return Err(DrError::Config("encryption requested but no cipher is configured".into()));
        }
        if options.remote_upload && self.deps.remote.is_none() {
            return Err(DrError::Config("remote upload requested but no remote storage is configured".into()));
        }
        Ok(selected)
    }

    fn select_adapters(&self, domains: &[Domain]) -> Result<Vec<Arc<dyn ComponentAdapter>>> {
        let wanted: Vec<Domain> = if domains.is_empty() {
            self.default_domains()
        } else {
            domains.to_vec()
        };
        let mut selected: BTreeMap<Domain, Arc<dyn ComponentAdapter>> = BTreeMap::new();
        for domain in wanted {
            let adapter = self
                .deps
                .adapters
                .get(&domain)
                .ok_or_else(|| DrError::Config(format!("domain {domain} is not configured")))?;
            selected.insert(domain, adapter.clone());
        }
        if selected.is_empty() {
            return Err(DrError::Config("no backup domains configured".into()));
        }
        Ok(selected.into_values().collect())
    }

    /// Fan out to every adapter and wait for all of them.
    async fn collect(
        &self,
        backup_id: &str,
        job_dir: &Path,
        adapters: Vec<Arc<dyn ComponentAdapter>>,
        cancel: &CancellationToken,
    ) -> BTreeMap<Domain, ComponentResult> {
        let timeout = self.pipeline.stage_timeout();
        let mut handles = Vec::with_capacity(adapters.len());

        for adapter in adapters {
            let domain = adapter.domain();
            let ctx = BackupContext {
                backup_id: backup_id.to_string(),
                job_dir: job_dir.to_path_buf(),
                cancel: cancel.child_token(),
            };
            let handle = tokio::spawn(async move {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(DrError::Cancelled),
                    outcome = tokio::time::timeout(timeout, adapter.backup(&ctx)) => match outcome {
                        Ok(result) => result,
                        Err(_) => Err(DrError::Timeout {
                            what: format!("{domain} backup"),
                            secs: timeout.as_secs(),
                        }),
                    },
                }
            });
            handles.push((domain, handle));
        }

        let mut results = BTreeMap::new();
        for (domain, handle) in handles {
            let result = match handle.await {
                Ok(Ok(mut result)) => {
                    result.domain = domain;
                    info!("Domain {} backed up: {} artifact(s), {} bytes", domain, result.artifacts.len(), result.total_size);
                    result
                }
                Ok(Err(e)) => {
                    error!("Domain {} failed: {}", domain, e);
                    ComponentResult::failed(domain, e.to_string())
                }
                Err(e) => {
                    error!("Domain {} adapter panicked: {}", domain, e);
                    ComponentResult::failed(domain, format!("adapter task failed: {e}"))
                }
            };
            if !result.is_success() {
                // Partial output of a failed domain never reaches the manifest
                let _ = remove_dir_if_exists(&job_dir.join(domain.as_str())).await;
            }
            results.insert(domain, result);
        }
        results
    }

    /// Bound a stage by the stage timeout and the cancellation token.
    async fn staged<T>(
        &self,
        stage: PipelineStage,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.pipeline.stage_timeout();
        debug!("Running stage {}", stage);
        tokio::select! {
            _ = cancel.cancelled() => Err(DrError::Cancelled),
            outcome = tokio::time::timeout(timeout, work) => outcome.map_err(|_| DrError::Timeout {
                what: format!("{stage} stage"),
                secs: timeout.as_secs(),
            })?,
        }
    }

    async fn verify_content(&self, job_dir: &Path, manifest: &Manifest) -> Result<VerificationResult> {
        let artifacts: Vec<_> = manifest.artifacts().cloned().collect();
        Ok(self.verifier.verify(job_dir, &artifacts, ChecksumTarget::Content).await)
    }

    /// Apply one transform to every artifact. Outputs are written first and
    /// committed together, so a failure leaves every artifact in its
    /// previous stored form.
    async fn transform(&self, manifest: &mut Manifest, job_dir: &Path, transform: &Transform) -> Result<()> {
        let mut produced: Vec<StoredForm> = Vec::new();
        let mut outcome = Ok(());

        for artifact in manifest.artifacts() {
            let src = job_dir.join(artifact.stored_path());
            let rel = with_suffix(artifact.stored_path(), transform.suffix());
            let dest = job_dir.join(&rel);
            let step = async {
                let size = transform.apply(&src, &dest).await?;
                let checksum = checksum_file(&dest).await?;
                Ok::<_, DrError>(StoredForm { path: rel.clone(), size, checksum })
            };
            match step.await {
                Ok(form) => produced.push(form),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    outcome = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = outcome {
            for form in &produced {
                let _ = tokio::fs::remove_file(job_dir.join(&form.path)).await;
            }
            return Err(e);
        }

        for (artifact, form) in manifest.artifacts_mut().zip(produced) {
            if let Err(e) = tokio::fs::remove_file(job_dir.join(artifact.stored_path())).await {
                warn!("Could not remove intermediate {}: {}", artifact.stored_path(), e);
            }
            artifact.stored = Some(form);
        }
        Ok(())
    }

    /// Upload every stored form and then the manifest itself. On failure,
    /// uploaded objects are deleted and the manifest keeps no remote keys.
    async fn upload(&self, manifest: &mut Manifest, job_dir: &Path) -> Result<()> {
        let remote = self
            .deps
            .remote
            .clone()
            .ok_or_else(|| DrError::storage("no remote storage configured"))?;
        let prefix = manifest.backup_id.clone();
        let mut uploaded: Vec<String> = Vec::new();

        let mut outcome = Ok(());
        for artifact in manifest.artifacts() {
            let key = object_key(&prefix, artifact.stored_path());
            match remote.upload(&job_dir.join(artifact.stored_path()), &key).await {
                Ok(_) => uploaded.push(key),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if outcome.is_ok() {
            for (artifact, key) in manifest.artifacts_mut().zip(uploaded.iter()) {
                artifact.remote_key = Some(key.clone());
            }
            manifest.transforms.uploaded = true;
            manifest.transforms.remote_prefix = Some(prefix.clone());

            let manifest_path = job_dir.join(MANIFEST_FILE);
            outcome = async {
                manifest.save(&manifest_path).await?;
                remote.upload(&manifest_path, &object_key(&prefix, MANIFEST_FILE)).await?;
                Ok::<(), DrError>(())
            }
            .await;

            if outcome.is_err() {
                for artifact in manifest.artifacts_mut() {
                    artifact.remote_key = None;
                }
                manifest.transforms.uploaded = false;
                manifest.transforms.remote_prefix = None;
            }
        }

        if let Err(e) = outcome {
            for key in &uploaded {
                if let Err(cleanup) = remote.delete(key).await {
                    warn!("Failed to remove partial upload {}: {}", key, cleanup);
                }
            }
            return Err(e);
        }
        info!("Uploaded {} artifact(s) to {}", uploaded.len(), remote.describe());
        Ok(())
    }

    /// Mirror the manifest's final stored forms into the job's results.
    fn sync_components(&self, job: &mut BackupJob, manifest: &Manifest) {
        for (domain, artifacts) in &manifest.domains {
            if let Some(component) = job.components.get_mut(domain) {
                component.artifacts = artifacts.clone();
            }
        }
    }

    async fn fail(&self, mut job: BackupJob, job_dir: &Path, e: DrError) -> BackupJob {
        error!("Backup {} failed: {}", job.id, e);
        job.error = Some(e.to_string());
        job.finish(JobStatus::Failed);
        let _ = remove_dir_if_exists(job_dir).await;
        self.record_and_notify(&job).await;
        job
    }

    /// Cancelled: drop everything written so far, register nothing.
    async fn abandon(&self, mut job: BackupJob, job_dir: &Path, manifest: Option<&Manifest>) -> BackupJob {
        warn!("Backup {} cancelled; discarding artifacts", job.id);
        if let (Some(manifest), Some(remote)) = (manifest, &self.deps.remote) {
            for artifact in manifest.artifacts() {
                let _ = remote.delete(&object_key(&job.id, artifact.stored_path())).await;
            }
            let _ = remote.delete(&object_key(&job.id, MANIFEST_FILE)).await;
        }
        let _ = remove_dir_if_exists(job_dir).await;
        job.error = Some(DrError::Cancelled.to_string());
        job.finish(JobStatus::Cancelled);
        self.record_and_notify(&job).await;
        job
    }

    async fn record_and_notify(&self, job: &BackupJob) {
        if let Err(e) = self.deps.store.record_backup(job).await {
            warn!("Failed to record backup history for {}: {}", job.id, e);
        }

        let kind = if job.status == JobStatus::Completed {
            EventKind::BackupCompleted
        } else {
            EventKind::BackupFailed
        };
        let mut event = PipelineEvent::new(kind, &self.node_id, &job.id);
        event.backup_id = Some(job.id.clone());
        event.status = job.status.to_string();
        event.duration_ms = job.duration_ms;
        event.size_bytes = job.total_size;
        event.error = job.error.clone();
        for domain in job.failed_domains() {
            let reason = job.components.get(&domain).and_then(|c| c.error.clone()).unwrap_or_default();
            event.warnings.push(format!("domain {domain} failed: {reason}"));
        }
        for stage in job.stages.iter().filter(|s| s.status == crate::model::StageStatus::Failed) {
            event
                .warnings
                .push(format!("stage {} failed: {}", stage.stage, stage.error.as_deref().unwrap_or("")));
        }
        deliver(self.deps.notifier.as_ref(), &event).await;
    }
}

fn locations(job_dir: &Path, manifest: &Manifest) -> Vec<Location> {
    let mut locations = vec![Location::Local(job_dir.to_string_lossy().into_owned())];
    if let Some(prefix) = &manifest.transforms.remote_prefix {
        locations.push(Location::Remote(prefix.clone()));
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StageStatus, TransformRecord};
    use crate::testing::{FailingAdapter, Fixture, SlowAdapter};
    use crate::store::RecoveryPointStore;

    fn uncompressed() -> BackupOptions {
        BackupOptions {
            compression: false,
            ..BackupOptions::default()
        }
    }

    #[tokio::test]
    async fn test_example_scenario_database_and_files() {
        let fx = Fixture::new().await;
        let orchestrator = fx.backup_orchestrator();

        let job = orchestrator
            .run_full_backup(&[Domain::Database, Domain::Files], &BackupOptions::default())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.verified);
        assert_eq!(job.components.len(), 2);
        assert!(job.components.values().all(|c| c.is_success() && !c.artifacts.is_empty()));
        assert_eq!(job.stage(PipelineStage::Compress).unwrap().status, StageStatus::Succeeded);
        assert_eq!(job.stage(PipelineStage::Encrypt).unwrap().status, StageStatus::Skipped);
        assert_eq!(job.stage(PipelineStage::Upload).unwrap().status, StageStatus::Skipped);

        let manifest = Manifest::load(Path::new(job.manifest_path.as_ref().unwrap())).await.unwrap();
        assert_eq!(manifest.artifact_count(), 2);
        assert_eq!(
            manifest.transforms,
            TransformRecord { compressed: true, ..TransformRecord::default() }
        );

        let point = fx.store.get(&job.id).await.unwrap().unwrap();
        assert!(point.verified);
        assert_eq!(point.domains, vec![Domain::Database, Domain::Files]);
    }

    #[tokio::test]
    async fn test_stored_checksums_match_stored_files() {
        let fx = Fixture::new().await;
        let job = fx
            .backup_orchestrator()
            .run_full_backup(&[], &BackupOptions::default())
            .await
            .unwrap();

        let job_dir = fx.config.storage.root.join(&job.id);
        for artifact in job.artifacts() {
            let stored = artifact.stored.as_ref().unwrap();
            assert!(stored.path.ends_with(".zst"));
            assert_eq!(checksum_file(&job_dir.join(&stored.path)).await.unwrap(), stored.checksum);
            // the raw file was replaced by its compressed form
            assert!(!job_dir.join(&artifact.path).exists());
        }
    }

    #[tokio::test]
    async fn test_failing_domain_does_not_abort_job() {
        let fx = Fixture::new().await;
        let orchestrator = fx.backup_orchestrator_with(|adapters| {
            adapters.insert(Domain::Marketplace, Arc::new(FailingAdapter::new(Domain::Marketplace)));
        });

        let job = orchestrator.run_full_backup(&[], &uncompressed()).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed_domains(), vec![Domain::Marketplace]);
        assert!(job.is_partial());
        assert!(!job.verified);
        assert!(job.components[&Domain::Database].is_success());
        assert!(job.components[&Domain::Files].is_success());

        // persisted for visibility, but not usable until a verification pass
        let point = fx.store.get(&job.id).await.unwrap().unwrap();
        assert!(!point.verified);
        assert!(fx.store.latest_verified().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_artifacts_fails_without_point() {
        let fx = Fixture::new().await;
        let orchestrator = fx.backup_orchestrator_with(|adapters| {
            adapters.clear();
            adapters.insert(Domain::Database, Arc::new(FailingAdapter::new(Domain::Database)));
        });

        let job = orchestrator.run_full_backup(&[], &uncompressed()).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("Manifest"));
        assert!(fx.store.list().await.unwrap().is_empty());
        assert!(!fx.config.storage.root.join(&job.id).exists());
        assert_eq!(fx.notifier.kinds().last(), Some(&EventKind::BackupFailed));
    }

    #[tokio::test]
    async fn test_two_runs_are_independent() {
        let fx = Fixture::new().await;
        let orchestrator = fx.backup_orchestrator();

        let first = orchestrator.run_full_backup(&[], &BackupOptions::default()).await.unwrap();
        let second = orchestrator.run_full_backup(&[], &BackupOptions::default()).await.unwrap();

        assert_ne!(first.id, second.id);
        let first_dir = fx.config.storage.root.join(&first.id);
        let second_dir = fx.config.storage.root.join(&second.id);
        for a in first.artifacts() {
            assert!(first_dir.join(a.stored_path()).exists());
        }
        for a in second.artifacts() {
            assert!(second_dir.join(a.stored_path()).exists());
        }
        assert_eq!(fx.store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_backup_is_rejected() {
        let fx = Fixture::new().await;
        let orchestrator = Arc::new(fx.backup_orchestrator_with(|adapters| {
            adapters.insert(Domain::Configuration, Arc::new(SlowAdapter::new(Domain::Configuration, 500)));
        }));

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_full_backup(&[], &uncompressed()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = orchestrator.run_full_backup(&[], &uncompressed()).await.unwrap_err();
        assert!(matches!(err, DrError::BackupInProgress(_)));

        let job = running.await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // lease released
        assert!(!fx.config.storage.root.join(LEASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_lease_refuses_holder_and_takes_over_stale() {
        let dir = tempfile::TempDir::new().unwrap();

        let held = BackupLease::acquire(dir.path(), "backup_a", Duration::from_secs(60))
            .await
            .unwrap();
        let err = BackupLease::acquire(dir.path(), "backup_b", Duration::from_secs(60))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DrError::BackupInProgress(ref holder) if holder == "backup_a"));

        // A zero TTL makes the existing lease stale
        std::mem::forget(held);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let taken = BackupLease::acquire(dir.path(), "backup_c", Duration::ZERO).await.unwrap();
        let holder = std::fs::read_to_string(dir.path().join(LEASE_FILE)).unwrap();
        assert_eq!(holder, "backup_c");

        drop(taken);
        assert!(!dir.path().join(LEASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_cancelled_backup_leaves_no_point() {
        let fx = Fixture::new().await;
        let orchestrator = fx.backup_orchestrator_with(|adapters| {
            adapters.insert(Domain::Configuration, Arc::new(SlowAdapter::new(Domain::Configuration, 5_000)));
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let job = orchestrator
            .run_full_backup_cancellable(&[], &uncompressed(), cancel)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(fx.store.list().await.unwrap().is_empty());
        assert!(!fx.config.storage.root.join(&job.id).exists());
    }

    #[tokio::test]
    async fn test_domain_timeout_becomes_domain_failure() {
        let mut fx = Fixture::new().await;
        fx.config.pipeline.stage_timeout_secs = 1;
        let orchestrator = fx.backup_orchestrator_with(|adapters| {
            adapters.insert(Domain::Configuration, Arc::new(SlowAdapter::new(Domain::Configuration, 3_000)));
        });

        let job = orchestrator.run_full_backup(&[], &uncompressed()).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let failed = &job.components[&Domain::Configuration];
        assert!(failed.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_encrypt_and_upload() {
        let fx = Fixture::with_remote_and_key().await;
        let options = BackupOptions {
            encryption: true,
            remote_upload: true,
            ..BackupOptions::default()
        };

        let job = fx.backup_orchestrator().run_full_backup(&[], &options).await.unwrap();

        assert_eq!(job.stage(PipelineStage::Encrypt).unwrap().status, StageStatus::Succeeded);
        assert_eq!(job.stage(PipelineStage::Upload).unwrap().status, StageStatus::Succeeded);
        for artifact in job.artifacts() {
            assert!(artifact.stored_path().ends_with(".zst.enc"));
            let key = artifact.remote_key.as_ref().unwrap();
            assert!(fx.remote_dir().join(key).exists());
        }
        assert!(fx.remote_dir().join(&job.id).join(MANIFEST_FILE).exists());

        let point = fx.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(point.remote_prefix(), Some(job.id.as_str()));
    }

    #[tokio::test]
    async fn test_reverify_promotes_unverified_point() {
        let fx = Fixture::new().await;
        let options = BackupOptions {
            verification: false,
            ..BackupOptions::default()
        };
        let orchestrator = fx.backup_orchestrator();
        let job = orchestrator.run_full_backup(&[], &options).await.unwrap();
        assert!(!fx.store.get(&job.id).await.unwrap().unwrap().verified);

        let result = orchestrator.reverify(&job.id).await.unwrap();
        assert!(result.passed);
        assert!(fx.store.get(&job.id).await.unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_reverify_detects_corruption() {
        let fx = Fixture::new().await;
        let orchestrator = fx.backup_orchestrator();
        let first = orchestrator.run_full_backup(&[], &BackupOptions::default()).await.unwrap();
        let second = orchestrator.run_full_backup(&[], &BackupOptions::default()).await.unwrap();

        let victim = second.artifacts().next().unwrap().stored_path().to_string();
        std::fs::write(fx.config.storage.root.join(&second.id).join(victim), b"bit rot").unwrap();

        let result = orchestrator.reverify(&second.id).await.unwrap();
        assert!(!result.passed);
        assert!(!fx.store.get(&second.id).await.unwrap().unwrap().verified);
        assert_eq!(fx.store.latest_verified().await.unwrap().unwrap().backup_id, first.id);
    }
}
