//! Manifest types.
//!
//! A manifest lists every artifact of a backup job by domain together with
//! the transforms applied to them, serialized as `manifest.json` in the job
//! directory. Recovery reads it to know what to fetch and which transforms to
//! reverse.

use super::{ArtifactRef, BackupJob, BackupKind, Domain};
use crate::utils::{DrError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub domains: BTreeMap<Domain, Vec<ArtifactRef>>,
    /// Domains whose adapter failed; listed so a restore never mistakes
    /// them for empty domains.
    #[serde(default)]
    pub failed_domains: Vec<Domain>,
    pub transforms: TransformRecord,
}

/// Which forward stages have been applied to the stored artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub compressed: bool,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    pub uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_prefix: Option<String>,
}

impl Manifest {
    /// Build the manifest from the collected domain results.
    /// Fails when no domain produced a single artifact.
    pub fn from_job(job: &BackupJob) -> Result<Self> {
        let mut domains = BTreeMap::new();
        let mut failed_domains = Vec::new();

        for (domain, result) in &job.components {
            if result.is_success() {
                domains.insert(*domain, result.artifacts.clone());
            } else {
                failed_domains.push(*domain);
            }
        }

        let artifact_count: usize = domains.values().map(Vec::len).sum();
        if artifact_count == 0 {
            return Err(DrError::ManifestCreationFailure(format!(
                "no domain produced an artifact ({} failed)",
                failed_domains.len()
            )));
        }

        Ok(Self {
            version: MANIFEST_VERSION,
            backup_id: job.id.clone(),
            created_at: job.started_at,
            kind: job.kind.clone(),
            domains,
            failed_domains,
            transforms: TransformRecord::default(),
        })
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.domains.values().flat_map(|a| a.iter())
    }

    pub fn artifacts_mut(&mut self) -> impl Iterator<Item = &mut ArtifactRef> {
        self.domains.values_mut().flat_map(|a| a.iter_mut())
    }

    pub fn artifact_count(&self) -> usize {
        self.domains.values().map(Vec::len).sum()
    }

    pub fn stored_size(&self) -> u64 {
        self.artifacts().map(|a| a.stored_size()).sum()
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        crate::fs::write_json_atomic(path, self).await?;
        Ok(())
    }
}
