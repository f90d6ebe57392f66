//! Retention: deletes expired recovery points and their artifacts.
//!
//! Metadata goes first, through the store, which refuses to drop the last
//! verified point; artifacts are only deleted once the store has let go of
//! the point. A failed artifact deletion leaves orphaned files behind and is
//! reported, but never resurrects the point.

use crate::config::RetentionConfig;
use crate::fs::remove_dir_if_exists;
use crate::model::manifest::MANIFEST_FILE;
use crate::model::RecoveryPoint;
use crate::storage::{fetch_manifest, object_key, RemoteStorage};
use crate::store::RecoveryPointStore;
use crate::utils::{DrError, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_points: Option<usize>,
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            max_points: config.max_points,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneResult {
    pub deleted: Vec<String>,
    pub bytes_reclaimed: u64,
    /// Expired point kept because it is the last verified one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_for_invariant: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl PruneResult {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

pub struct RetentionManager {
    store: Arc<dyn RecoveryPointStore>,
    remote: Option<Arc<dyn RemoteStorage>>,
    /// Scratch space for manifests fetched during remote cleanup
    work_dir: PathBuf,
}

impl RetentionManager {
    pub fn new(
        store: Arc<dyn RecoveryPointStore>,
        remote: Option<Arc<dyn RemoteStorage>>,
        work_dir: PathBuf,
    ) -> Self {
        Self { store, remote, work_dir }
    }

    /// Points selected for deletion under `policy`, oldest first, with the
    /// id of a point spared by the invariant if any.
    fn select(points: &[RecoveryPoint], policy: &RetentionPolicy) -> (Vec<RecoveryPoint>, Option<String>) {
        let cutoff = Utc::now() - Duration::days(i64::from(policy.retention_days));
        let mut doomed: BTreeSet<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.created_at < cutoff)
            .map(|(i, _)| i)
            .collect();

        if let Some(max) = policy.max_points {
            let overflow = points.len().saturating_sub(max);
            doomed.extend(0..overflow);
        }

        // Keep the newest verified point if everything verified is doomed
        let mut spared = None;
        let verified_survivor = points
            .iter()
            .enumerate()
            .any(|(i, p)| p.verified && !doomed.contains(&i));
        if !verified_survivor {
            if let Some((i, p)) = points.iter().enumerate().rev().find(|(_, p)| p.verified) {
                doomed.remove(&i);
                spared = Some(p.backup_id.clone());
            }
        }

        (doomed.into_iter().map(|i| points[i].clone()).collect(), spared)
    }

    pub async fn prune(&self, policy: &RetentionPolicy) -> Result<PruneResult> {
        let points = self.store.list().await?;
        let (doomed, spared) = Self::select(&points, policy);
        let mut result = PruneResult {
            retained_for_invariant: spared,
            ..Default::default()
        };

        if let Some(id) = &result.retained_for_invariant {
            warn!("Keeping expired recovery point {}: it is the last verified one", id);
        }

        for point in doomed {
            match self.delete(&point).await {
                Ok(errors) => {
                    result.bytes_reclaimed += point.size;
                    result.deleted.push(point.backup_id.clone());
                    result.errors.extend(errors);
                }
                // Lost a race with another writer; the point stays
                Err(DrError::RetentionInvariantViolation(id)) => {
                    warn!("Store refused to remove {}: last verified point", id);
                    result.retained_for_invariant.get_or_insert(id);
                }
                Err(e) => result.errors.push(format!("{}: {}", point.backup_id, e)),
            }
        }

        info!(
            "Retention pruned {} point(s), reclaimed {} bytes",
            result.deleted.len(),
            result.bytes_reclaimed
        );
        Ok(result)
    }

    /// Operator removal of a single point, under the same invariant.
    pub async fn remove_point(&self, backup_id: &str) -> Result<PruneResult> {
        let point = self
            .store
            .get(backup_id)
            .await?
            .ok_or_else(|| DrError::RecoveryPointNotFound(backup_id.to_string()))?;
        let errors = self.delete(&point).await?;
        Ok(PruneResult {
            deleted: vec![point.backup_id],
            bytes_reclaimed: point.size,
            retained_for_invariant: None,
            errors,
        })
    }

    /// Remove metadata, then artifacts. Returns artifact deletion errors.
    async fn delete(&self, point: &RecoveryPoint) -> Result<Vec<String>> {
        self.store.remove(&point.backup_id).await?;
        let mut errors = Vec::new();

        if let Some(prefix) = point.remote_prefix() {
            if let Err(e) = self.delete_remote(point, prefix).await {
                errors.push(format!("{}: remote cleanup failed: {}", point.backup_id, e));
            }
        }
        // Remote deletion reads the local manifest, so the directory goes last
        if let Some(dir) = point.local_dir() {
            if let Err(e) = remove_dir_if_exists(Path::new(dir)).await {
                errors.push(format!("{}: local cleanup failed: {}", point.backup_id, e));
            }
        }

        for e in &errors {
            warn!("{}", e);
        }
        info!("Deleted recovery point {}", point.backup_id);
        Ok(errors)
    }

    async fn delete_remote(&self, point: &RecoveryPoint, prefix: &str) -> Result<()> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| DrError::storage("point is remote but no remote storage is configured"))?;
        let scratch = self.work_dir.join(format!("prune-{}", point.backup_id));
        let manifest = fetch_manifest(point, Some(remote.as_ref()), &scratch).await;
        let _ = remove_dir_if_exists(&scratch).await;
        let manifest = manifest?;

        for artifact in manifest.artifacts() {
            if let Some(key) = &artifact.remote_key {
                remote.delete(key).await?;
            }
        }
        remote.delete(&object_key(prefix, MANIFEST_FILE)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;
    use crate::store::JsonPointStore;
    use tempfile::TempDir;

    fn point(root: &Path, id: &str, age_days: i64, verified: bool) -> RecoveryPoint {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("artifact"), vec![0u8; 64]).unwrap();
        RecoveryPoint {
            backup_id: id.to_string(),
            created_at: Utc::now() - Duration::days(age_days),
            verified,
            size: 64,
            locations: vec![Location::Local(dir.to_string_lossy().into_owned())],
            domains: vec![],
        }
    }

    async fn manager(points: Vec<RecoveryPoint>, state: &Path) -> (RetentionManager, Arc<JsonPointStore>) {
        let store = Arc::new(JsonPointStore::open(state).await.unwrap());
        for p in points {
            store.insert(p).await.unwrap();
        }
        (RetentionManager::new(store.clone(), None, state.join("temp")), store)
    }

    #[tokio::test]
    async fn test_prunes_expired_points_and_artifacts() {
        let root = TempDir::new().unwrap();
        let points = vec![
            point(root.path(), "backup_old", 40, true),
            point(root.path(), "backup_mid", 35, false),
            point(root.path(), "backup_new", 1, true),
        ];
        let (manager, store) = manager(points, &root.path().join("state")).await;

        let result = manager
            .prune(&RetentionPolicy { retention_days: 30, max_points: None })
            .await
            .unwrap();

        assert_eq!(result.deleted, vec!["backup_old", "backup_mid"]);
        assert_eq!(result.bytes_reclaimed, 128);
        assert!(result.retained_for_invariant.is_none());
        assert!(!root.path().join("backup_old").exists());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_never_deletes_last_verified_point() {
        let root = TempDir::new().unwrap();
        let points = vec![
            point(root.path(), "backup_a", 90, true),
            point(root.path(), "backup_b", 60, true),
            point(root.path(), "backup_c", 45, false),
        ];
        let (manager, store) = manager(points, &root.path().join("state")).await;

        let result = manager
            .prune(&RetentionPolicy { retention_days: 30, max_points: None })
            .await
            .unwrap();

        assert_eq!(result.retained_for_invariant.as_deref(), Some("backup_b"));
        assert_eq!(result.deleted, vec!["backup_a", "backup_c"]);
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].verified);
        assert!(root.path().join("backup_b").exists());
    }

    #[tokio::test]
    async fn test_max_points_trims_oldest() {
        let root = TempDir::new().unwrap();
        let points = vec![
            point(root.path(), "backup_1", 3, true),
            point(root.path(), "backup_2", 2, true),
            point(root.path(), "backup_3", 1, true),
        ];
        let (manager, _store) = manager(points, &root.path().join("state")).await;

        let result = manager
            .prune(&RetentionPolicy { retention_days: 30, max_points: Some(2) })
            .await
            .unwrap();
        assert_eq!(result.deleted, vec!["backup_1"]);
    }

    #[tokio::test]
    async fn test_remove_point_respects_invariant() {
        let root = TempDir::new().unwrap();
        let points = vec![point(root.path(), "backup_only", 1, true)];
        let (manager, _store) = manager(points, &root.path().join("state")).await;

        let err = manager.remove_point("backup_only").await.unwrap_err();
        assert!(matches!(err, DrError::RetentionInvariantViolation(_)));
        assert!(root.path().join("backup_only").exists());
    }

    #[tokio::test]
    async fn test_remote_cleanup_fetches_manifest_into_work_dir() {
        use crate::backup::BackupOptions;
        use crate::testing::Fixture;

        let fx = Fixture::with_remote_and_key().await;
        let options = BackupOptions {
            remote_upload: true,
            ..BackupOptions::default()
        };
        let orchestrator = fx.backup_orchestrator();
        let old = orchestrator.run_full_backup(&[], &options).await.unwrap();
        orchestrator.run_full_backup(&[], &options).await.unwrap();

        // Only the remote copy is left, so the manifest has to be downloaded
        std::fs::remove_dir_all(fx.config.storage.root.join(&old.id)).unwrap();
        let remote = fx.remote.clone().unwrap();
        let manifest_key = object_key(&old.id, MANIFEST_FILE);
        assert!(remote.exists(&manifest_key).await.unwrap());

        let result = fx.retention().remove_point(&old.id).await.unwrap();

        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(!remote.exists(&manifest_key).await.unwrap());
        assert!(!fx.config.storage.work_dir.join(format!("prune-{}", old.id)).exists());
    }

    #[test]
    fn test_selection_without_verified_points() {
        let root = TempDir::new().unwrap();
        let points = vec![point(root.path(), "backup_x", 100, false)];
        let (doomed, spared) = RetentionManager::select(
            &points,
            &RetentionPolicy { retention_days: 7, max_points: None },
        );
        assert_eq!(doomed.len(), 1);
        assert!(spared.is_none());
    }
}
