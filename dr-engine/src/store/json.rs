//! File-backed store for single-node deployments.
//!
//! Layout under the state directory:
//! - `recovery_points.json`: the registry, rewritten atomically on change
//! - `backups.jsonl`, `recoveries.jsonl`, `drills.jsonl`: append-only history

use super::{guard_last_verified, RecoveryPointStore};
use crate::fs::write_json_atomic;
use crate::model::{BackupJob, DrillResult, RecoveryJob, RecoveryPoint};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

const POINTS_FILE: &str = "recovery_points.json";
const BACKUPS_LOG: &str = "backups.jsonl";
const RECOVERIES_LOG: &str = "recoveries.jsonl";
const DRILLS_LOG: &str = "drills.jsonl";

pub struct JsonPointStore {
    dir: PathBuf,
    /// Registry cache; every mutation holds this lock until the file is replaced.
    points: Mutex<Vec<RecoveryPoint>>,
}

impl JsonPointStore {
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(POINTS_FILE);
        let mut points: Vec<RecoveryPoint> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        points.sort_by(|a, b| (a.created_at, &a.backup_id).cmp(&(b.created_at, &b.backup_id)));
        Ok(Self {
            dir: dir.to_path_buf(),
            points: Mutex::new(points),
        })
    }

    async fn save(&self, points: &[RecoveryPoint]) -> Result<()> {
        write_json_atomic(&self.dir.join(POINTS_FILE), &points).await?;
        Ok(())
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        // Appends share the registry lock so history and registry stay in step
        let _guard = self.points.lock().await;
        let mut out = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }

    async fn read_log<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let content = match tokio::fs::read_to_string(self.dir.join(file)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                // A torn final line from a crash must not hide the rest of the history
                Err(e) => warn!("Skipping unreadable line {} of {}: {}", n + 1, file, e),
            }
        }
        Ok(records)
    }
}

fn within(at: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    at >= from && at <= to
}

#[async_trait]
impl RecoveryPointStore for JsonPointStore {
    async fn insert(&self, point: RecoveryPoint) -> Result<()> {
        let mut points = self.points.lock().await;
        let mut next = points.clone();
        next.retain(|p| p.backup_id != point.backup_id);
        next.push(point);
        next.sort_by(|a, b| (a.created_at, &a.backup_id).cmp(&(b.created_at, &b.backup_id)));
        self.save(&next).await?;
        *points = next;
        Ok(())
    }

    async fn get(&self, backup_id: &str) -> Result<Option<RecoveryPoint>> {
        let points = self.points.lock().await;
        Ok(points.iter().find(|p| p.backup_id == backup_id).cloned())
    }

    async fn list(&self) -> Result<Vec<RecoveryPoint>> {
        Ok(self.points.lock().await.clone())
    }

    async fn latest_verified(&self) -> Result<Option<RecoveryPoint>> {
        let points = self.points.lock().await;
        Ok(points.iter().rev().find(|p| p.verified).cloned())
    }

    async fn set_verified(&self, backup_id: &str, verified: bool) -> Result<()> {
        let mut points = self.points.lock().await;
        if !points.iter().any(|p| p.backup_id == backup_id) {
            return Err(DrError::RecoveryPointNotFound(backup_id.to_string()));
        }
        if !verified {
            guard_last_verified(points.iter(), backup_id)?;
        }
        let mut next = points.clone();
        for p in next.iter_mut().filter(|p| p.backup_id == backup_id) {
            p.verified = verified;
        }
        self.save(&next).await?;
        *points = next;
        Ok(())
    }

    async fn remove(&self, backup_id: &str) -> Result<RecoveryPoint> {
        let mut points = self.points.lock().await;
        let index = points
            .iter()
            .position(|p| p.backup_id == backup_id)
            .ok_or_else(|| DrError::RecoveryPointNotFound(backup_id.to_string()))?;
        guard_last_verified(points.iter(), backup_id)?;

        let mut next = points.clone();
        let removed = next.remove(index);
        self.save(&next).await?;
        *points = next;
        Ok(removed)
    }

    async fn record_backup(&self, job: &BackupJob) -> Result<()> {
        self.append(BACKUPS_LOG, job).await
    }

    async fn record_recovery(&self, job: &RecoveryJob) -> Result<()> {
        self.append(RECOVERIES_LOG, job).await
    }

    async fn record_drill(&self, result: &DrillResult) -> Result<()> {
        self.append(DRILLS_LOG, result).await
    }

    async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupJob>> {
        let jobs: Vec<BackupJob> = self.read_log(BACKUPS_LOG).await?;
        Ok(jobs.into_iter().rev().find(|j| j.id == backup_id))
    }

    async fn backups_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<BackupJob>> {
        let jobs: Vec<BackupJob> = self.read_log(BACKUPS_LOG).await?;
        Ok(jobs.into_iter().filter(|j| within(j.started_at, from, to)).collect())
    }

    async fn recoveries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RecoveryJob>> {
        let jobs: Vec<RecoveryJob> = self.read_log(RECOVERIES_LOG).await?;
        Ok(jobs.into_iter().filter(|j| within(j.started_at, from, to)).collect())
    }

    async fn drills_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DrillResult>> {
        let drills: Vec<DrillResult> = self.read_log(DRILLS_LOG).await?;
        Ok(drills.into_iter().filter(|d| within(d.started_at, from, to)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupKind, JobStatus, Location};
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn point(id: &str, age_days: i64, verified: bool) -> RecoveryPoint {
        RecoveryPoint {
            backup_id: id.to_string(),
            created_at: Utc::now() - Duration::days(age_days),
            verified,
            size: 100,
            locations: vec![Location::Local(format!("/srv/backups/{id}"))],
            domains: vec![],
        }
    }

    #[tokio::test]
    async fn test_points_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonPointStore::open(dir.path()).await.unwrap();
            store.insert(point("backup_new", 1, true)).await.unwrap();
            store.insert(point("backup_old", 5, false)).await.unwrap();
        }

        let store = JsonPointStore::open(dir.path()).await.unwrap();
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|p| p.backup_id).collect();
        assert_eq!(ids, vec!["backup_old", "backup_new"]);
        assert_eq!(store.latest_verified().await.unwrap().unwrap().backup_id, "backup_new");
    }

    #[tokio::test]
    async fn test_last_verified_point_is_protected() {
        let dir = TempDir::new().unwrap();
        let store = JsonPointStore::open(dir.path()).await.unwrap();
        store.insert(point("backup_a", 3, true)).await.unwrap();
        store.insert(point("backup_b", 1, false)).await.unwrap();

        let err = store.remove("backup_a").await.unwrap_err();
        assert!(matches!(err, DrError::RetentionInvariantViolation(_)));
        let err = store.set_verified("backup_a", false).await.unwrap_err();
        assert!(matches!(err, DrError::RetentionInvariantViolation(_)));

        store.remove("backup_b").await.unwrap();
        store.set_verified("backup_a", true).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(matches!(
            store.remove("backup_missing").await,
            Err(DrError::RecoveryPointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_promotion_unlocks_removal() {
        let dir = TempDir::new().unwrap();
        let store = JsonPointStore::open(dir.path()).await.unwrap();
        store.insert(point("backup_a", 3, true)).await.unwrap();
        store.insert(point("backup_b", 1, false)).await.unwrap();

        store.set_verified("backup_b", true).await.unwrap();
        let removed = store.remove("backup_a").await.unwrap();
        assert_eq!(removed.backup_id, "backup_a");
    }

    #[tokio::test]
    async fn test_concurrent_inserts_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonPointStore::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(point(&format!("backup_{i:02}"), i, i % 2 == 0)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let reopened = JsonPointStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_backup_history_queries() {
        let dir = TempDir::new().unwrap();
        let store = JsonPointStore::open(dir.path()).await.unwrap();

        let mut job = BackupJob::new("backup_h".into(), BackupKind::Full);
        job.finish(JobStatus::Completed);
        store.record_backup(&job).await.unwrap();

        let now = Utc::now();
        let found = store.backups_between(now - Duration::hours(1), now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.get_backup("backup_h").await.unwrap().unwrap().status, JobStatus::Completed);
        assert!(store.backups_between(now - Duration::days(3), now - Duration::days(2)).await.unwrap().is_empty());
        assert!(store.drills_between(now - Duration::days(1), now).await.unwrap().is_empty());
    }
}
