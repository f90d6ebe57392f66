//! SQLite-backed recovery point registry and job history.
//!
//! Mutations are serialised by a write lock and run in immediate
//! transactions, so the last-verified check and the change it guards
//! commit together.

use crate::db::connection::DbPool;
use crate::models::history::{self, HistoryTable};
use crate::models::recovery_point;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dr_engine::model::{BackupJob, DrillResult, RecoveryJob, RecoveryPoint};
use dr_engine::store::RecoveryPointStore;
use dr_engine::{DrError, Result};
use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::Mutex;

fn db_err(e: impl std::fmt::Display) -> DrError {
    DrError::storage(format!("database: {e}"))
}

pub struct SqlitePointStore {
    pool: DbPool,
    write_lock: Mutex<()>,
}

impl SqlitePointStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(db_err)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| DrError::storage(format!("store task failed: {e}")))?
    }

    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        self.blocking(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;
            let value = f(&tx)?;
            tx.commit().map_err(db_err)?;
            Ok(value)
        })
        .await
    }

    async fn history_between<T>(&self, table: HistoryTable, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        self.blocking(move |conn| history::find_between(conn, table, &from, &to).map_err(db_err))
            .await
    }
}

#[async_trait]
impl RecoveryPointStore for SqlitePointStore {
    async fn insert(&self, point: RecoveryPoint) -> Result<()> {
        self.write(move |conn| recovery_point::upsert(conn, &point).map_err(db_err))
            .await
    }

    async fn get(&self, backup_id: &str) -> Result<Option<RecoveryPoint>> {
        let id = backup_id.to_string();
        self.blocking(move |conn| recovery_point::find_by_id(conn, &id).map_err(db_err))
            .await
    }

    async fn list(&self) -> Result<Vec<RecoveryPoint>> {
        self.blocking(|conn| recovery_point::find_all(conn).map_err(db_err))
            .await
    }

    async fn latest_verified(&self) -> Result<Option<RecoveryPoint>> {
        self.blocking(|conn| recovery_point::find_latest_verified(conn).map_err(db_err))
            .await
    }

    async fn set_verified(&self, backup_id: &str, verified: bool) -> Result<()> {
        let id = backup_id.to_string();
        self.write(move |conn| {
            let point = recovery_point::find_by_id(conn, &id)
                .map_err(db_err)?
                .ok_or_else(|| DrError::RecoveryPointNotFound(id.clone()))?;
            if point.verified && !verified && recovery_point::count_verified_except(conn, &id).map_err(db_err)? == 0 {
                return Err(DrError::RetentionInvariantViolation(id));
            }
            recovery_point::set_verified(conn, &id, verified).map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, backup_id: &str) -> Result<RecoveryPoint> {
        let id = backup_id.to_string();
        self.write(move |conn| {
            let point = recovery_point::find_by_id(conn, &id)
                .map_err(db_err)?
                .ok_or_else(|| DrError::RecoveryPointNotFound(id.clone()))?;
            if point.verified && recovery_point::count_verified_except(conn, &id).map_err(db_err)? == 0 {
                return Err(DrError::RetentionInvariantViolation(id));
            }
            recovery_point::delete(conn, &id).map_err(db_err)?;
            Ok(point)
        })
        .await
    }

    async fn record_backup(&self, job: &BackupJob) -> Result<()> {
        let job = job.clone();
        self.write(move |conn| {
            history::record(conn, HistoryTable::Backups, &job.id, &job.started_at, &job.status.to_string(), &job)
                .map_err(db_err)
        })
        .await
    }

    async fn record_recovery(&self, job: &RecoveryJob) -> Result<()> {
        let job = job.clone();
        self.write(move |conn| {
            history::record(conn, HistoryTable::Recoveries, &job.id, &job.started_at, &job.status.to_string(), &job)
                .map_err(db_err)
        })
        .await
    }

    async fn record_drill(&self, result: &DrillResult) -> Result<()> {
        let result = result.clone();
        self.write(move |conn| {
            history::record(
                conn,
                HistoryTable::Drills,
                &result.id,
                &result.started_at,
                &result.status.to_string(),
                &result,
            )
            .map_err(db_err)
        })
        .await
    }

    async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupJob>> {
        let id = backup_id.to_string();
        self.blocking(move |conn| history::find_by_id(conn, HistoryTable::Backups, &id).map_err(db_err))
            .await
    }

    async fn backups_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<BackupJob>> {
        self.history_between(HistoryTable::Backups, from, to).await
    }

    async fn recoveries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RecoveryJob>> {
        self.history_between(HistoryTable::Recoveries, from, to).await
    }

    async fn drills_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DrillResult>> {
        self.history_between(HistoryTable::Drills, from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use chrono::Duration;
    use dr_engine::model::{BackupKind, Domain, JobStatus, Location};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SqlitePointStore {
        let pool = create_pool(&dir.path().join("test.db").to_string_lossy()).unwrap();
        migrate(&pool).unwrap();
        SqlitePointStore::new(pool)
    }

    fn point(id: &str, age_days: i64, verified: bool) -> RecoveryPoint {
        RecoveryPoint {
            backup_id: id.to_string(),
            created_at: Utc::now() - Duration::days(age_days),
            verified,
            size: 2048,
            locations: vec![
                Location::Local(format!("/srv/backups/{id}")),
                Location::Remote(format!("backups/{id}")),
            ],
            domains: vec![Domain::Database, Domain::Files],
        }
    }

    #[tokio::test]
    async fn test_points_round_trip_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert(point("backup_new", 1, true)).await.unwrap();
        store.insert(point("backup_old", 5, false)).await.unwrap();

        let points = store.list().await.unwrap();
        let ids: Vec<&str> = points.iter().map(|p| p.backup_id.as_str()).collect();
        assert_eq!(ids, vec!["backup_old", "backup_new"]);
        assert_eq!(points[1].remote_prefix(), Some("backups/backup_new"));
        assert_eq!(points[1].domains, vec![Domain::Database, Domain::Files]);

        let latest = store.latest_verified().await.unwrap().unwrap();
        assert_eq!(latest.backup_id, "backup_new");
        assert!(store.get("backup_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_verified_point_is_protected() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert(point("backup_a", 3, true)).await.unwrap();
        store.insert(point("backup_b", 1, false)).await.unwrap();

        let err = store.remove("backup_a").await.unwrap_err();
        assert!(matches!(err, DrError::RetentionInvariantViolation(_)));
        let err = store.set_verified("backup_a", false).await.unwrap_err();
        assert!(matches!(err, DrError::RetentionInvariantViolation(_)));
        assert!(store.get("backup_a").await.unwrap().unwrap().verified);

        store.set_verified("backup_b", true).await.unwrap();
        let removed = store.remove("backup_a").await.unwrap();
        assert_eq!(removed.backup_id, "backup_a");
        assert!(matches!(
            store.remove("backup_a").await,
            Err(DrError::RecoveryPointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open(&dir));

        let mut handles = Vec::new();
        for i in 0..12 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(point(&format!("backup_{i:02}"), i, i % 3 == 0)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.list().await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_history_is_filtered_by_start_time() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let mut recent = BackupJob::new("backup_recent".into(), BackupKind::Full);
        recent.status = JobStatus::Completed;
        let mut old = BackupJob::new("backup_old".into(), BackupKind::Full);
        old.started_at = Utc::now() - Duration::days(40);
        old.status = JobStatus::Failed;
        store.record_backup(&old).await.unwrap();
        store.record_backup(&recent).await.unwrap();

        // Re-recording replaces the earlier row
        recent.verified = true;
        store.record_backup(&recent).await.unwrap();

        let now = Utc::now();
        let window = store.backups_between(now - Duration::days(30), now).await.unwrap();
        assert_eq!(window.len(), 1);
        assert!(window[0].verified);

        let all = store.backups_between(now - Duration::days(60), now).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "backup_old");

        let fetched = store.get_backup("backup_old").await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
    }
}
