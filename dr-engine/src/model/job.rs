use super::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── BackupJob ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "domains", rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Scoped(Vec<Domain>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

/// Post-manifest stages of the forward pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Verify,
    Compress,
    Encrypt,
    Upload,
    Persist,
    Prune,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Verify => "verify",
            PipelineStage::Compress => "compress",
            PipelineStage::Encrypt => "encrypt",
            PipelineStage::Upload => "upload",
            PipelineStage::Persist => "persist",
            PipelineStage::Prune => "prune",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: PipelineStage,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn succeeded(stage: PipelineStage) -> Self {
        Self { stage, status: StageStatus::Succeeded, error: None }
    }

    pub fn skipped(stage: PipelineStage) -> Self {
        Self { stage, status: StageStatus::Skipped, error: None }
    }

    pub fn failed(stage: PipelineStage, error: impl Into<String>) -> Self {
        Self { stage, status: StageStatus::Failed, error: Some(error.into()) }
    }
}

/// One run of the forward pipeline. Mutated only by the orchestrator that
/// created it, and never again once its status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub kind: BackupKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub components: BTreeMap<Domain, ComponentResult>,
    pub manifest_path: Option<String>,
    pub stages: Vec<StageOutcome>,
    pub verified: bool,
    pub total_size: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupJob {
    pub fn new(id: String, kind: BackupKind) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
            components: BTreeMap::new(),
            manifest_path: None,
            stages: Vec::new(),
            verified: false,
            total_size: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn failed_domains(&self) -> Vec<Domain> {
        self.components
            .iter()
            .filter(|(_, r)| r.status == ComponentStatus::Failed)
            .map(|(d, _)| *d)
            .collect()
    }

    pub fn stage(&self, stage: PipelineStage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Completed, but with at least one failed domain or stage.
    pub fn is_partial(&self) -> bool {
        self.status == JobStatus::Completed
            && (!self.failed_domains().is_empty()
                || self.stages.iter().any(|s| s.status == StageStatus::Failed))
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.components.values().flat_map(|c| c.artifacts.iter())
    }

    pub(crate) fn finish(&mut self, status: JobStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.total_size = self.components.values().map(|c| c.total_size).sum();
    }
}

// ── ComponentResult ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Success,
    Failed,
}

/// Outcome of one domain's backup. Produced once per domain per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub domain: Domain,
    pub status: ComponentStatus,
    pub artifacts: Vec<ArtifactRef>,
    pub total_size: u64,
    /// Databases, directories, records or categories, depending on the domain.
    pub item_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentResult {
    pub fn success(domain: Domain, artifacts: Vec<ArtifactRef>, item_count: u64) -> Self {
        let total_size = artifacts.iter().map(|a| a.size).sum();
        Self {
            domain,
            status: ComponentStatus::Success,
            artifacts,
            total_size,
            item_count,
            error: None,
        }
    }

    pub fn failed(domain: Domain, error: impl Into<String>) -> Self {
        Self {
            domain,
            status: ComponentStatus::Failed,
            artifacts: Vec::new(),
            total_size: 0,
            item_count: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ComponentStatus::Success
    }
}

// ── ArtifactRef ──

/// A single persisted object produced by a domain backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Logical source: database name, directory, marketplace or category.
    pub name: String,
    /// Path of the raw artifact, relative to the job directory.
    pub path: String,
    pub size: u64,
    /// SHA-256 of the raw content, taken before any transform.
    pub checksum: String,
    /// Item count for this artifact (records, files); zero when not applicable.
    #[serde(default)]
    pub items: u64,
    /// Form actually kept on disk after compression and encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored: Option<StoredForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
}

impl ArtifactRef {
    /// Path and checksum of what is on disk right now.
    pub fn stored_path(&self) -> &str {
        self.stored.as_ref().map(|s| s.path.as_str()).unwrap_or(&self.path)
    }

    pub fn stored_checksum(&self) -> &str {
        self.stored.as_ref().map(|s| s.checksum.as_str()).unwrap_or(&self.checksum)
    }

    pub fn stored_size(&self) -> u64 {
        self.stored.as_ref().map(|s| s.size).unwrap_or(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredForm {
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, size: u64) -> ArtifactRef {
        ArtifactRef {
            name: name.to_string(),
            path: format!("database/{name}.sql"),
            size,
            checksum: "00".repeat(32),
            items: 0,
            stored: None,
            remote_key: None,
        }
    }

    #[test]
    fn test_component_success_sums_sizes() {
        let result = ComponentResult::success(Domain::Database, vec![artifact("a", 10), artifact("b", 32)], 2);
        assert!(result.is_success());
        assert_eq!(result.total_size, 42);
        assert_eq!(result.item_count, 2);
    }

    #[test]
    fn test_partial_job_detection() {
        let mut job = BackupJob::new("backup_x".into(), BackupKind::Full);
        job.components.insert(
            Domain::Database,
            ComponentResult::success(Domain::Database, vec![artifact("a", 10)], 1),
        );
        job.components.insert(Domain::Files, ComponentResult::failed(Domain::Files, "tar exited 2"));
        job.finish(JobStatus::Completed);

        assert!(job.is_partial());
        assert_eq!(job.failed_domains(), vec![Domain::Files]);
        assert_eq!(job.total_size, 10);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_stored_form_fallback() {
        let mut a = artifact("a", 10);
        assert_eq!(a.stored_path(), "database/a.sql");
        a.stored = Some(StoredForm {
            path: "database/a.sql.zst".into(),
            size: 4,
            checksum: "ff".into(),
        });
        assert_eq!(a.stored_path(), "database/a.sql.zst");
        assert_eq!(a.stored_checksum(), "ff");
        assert_eq!(a.stored_size(), 4);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_value(BackupKind::Scoped(vec![Domain::Files])).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "scoped", "domains": ["files"] }));
        let full = serde_json::to_value(BackupKind::Full).unwrap();
        assert_eq!(full, serde_json::json!({ "type": "full" }));
    }
}
