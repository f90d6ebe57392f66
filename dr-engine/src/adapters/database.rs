//! Relational data: one logical dump per configured database.

use super::{BackupContext, ComponentAdapter, DecodedArtifact, RestoreReport, RestoreTarget};
use crate::model::{ComponentResult, Domain};
use crate::tools::DumpTool;
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct DatabaseAdapter {
    databases: Vec<String>,
    tool: Arc<dyn DumpTool>,
}

impl DatabaseAdapter {
    pub fn new(databases: Vec<String>, tool: Arc<dyn DumpTool>) -> Self {
        Self { databases, tool }
    }
}

#[async_trait]
impl ComponentAdapter for DatabaseAdapter {
    fn domain(&self) -> Domain {
        Domain::Database
    }

    async fn backup(&self, ctx: &BackupContext) -> Result<ComponentResult> {
        if self.databases.is_empty() {
            return Err(DrError::DomainBackupFailure {
                domain: Domain::Database.to_string(),
                reason: "no databases configured".into(),
            });
        }
        let dir = ctx.domain_dir(Domain::Database).await?;
        let mut artifacts = Vec::with_capacity(self.databases.len());

        for name in &self.databases {
            ctx.check_cancelled()?;
            let dest = dir.join(format!("{name}.sql"));
            // Any failing dump fails the domain; a partial database set is not a snapshot
            self.tool.dump_database(name, &dest).await.map_err(|e| DrError::DomainBackupFailure {
                domain: Domain::Database.to_string(),
                reason: format!("{name}: {e}"),
            })?;
            let artifact = ctx.finalize(name, &dest, 1).await?;
            info!("Dumped database {} ({} bytes)", name, artifact.size);
            artifacts.push(artifact);
        }

        let count = artifacts.len() as u64;
        Ok(ComponentResult::success(Domain::Database, artifacts, count))
    }

    async fn restore(&self, artifacts: &[DecodedArtifact], target: &RestoreTarget) -> Result<RestoreReport> {
        let mut report = RestoreReport::new(Domain::Database);
        report.expected_items = artifacts.len() as u64;

        for decoded in artifacts {
            let database = target.database_name(&decoded.artifact.name);
            self.tool.restore_database(&database, &decoded.file).await?;
            info!("Restored database {} into {}", decoded.artifact.name, database);
            report.items += 1;
            report.restored.push(database);
        }
        Ok(report)
    }

    async fn discard_sandbox(&self, target: &RestoreTarget) -> Result<()> {
        if matches!(target, RestoreTarget::Production) {
            return Ok(());
        }
        let mut first_error = None;
        for name in &self.databases {
            let database = target.database_name(name);
            match self.tool.drop_database(&database).await {
                Ok(()) => info!("Dropped sandbox database {}", database),
                Err(e) => {
                    warn!("Failed to drop sandbox database {}: {}", database, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDumpTool;
    use tokio_util::sync::CancellationToken;

    fn ctx(dir: &std::path::Path) -> BackupContext {
        BackupContext {
            backup_id: "backup_db".into(),
            job_dir: dir.to_path_buf(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_one_artifact_per_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = Arc::new(FakeDumpTool::default());
        let adapter = DatabaseAdapter::new(vec!["shop".into(), "analytics".into()], tool.clone());

        let result = adapter.backup(&ctx(dir.path())).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.item_count, 2);
        let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["database/shop.sql", "database/analytics.sql"]);
    }

    #[tokio::test]
    async fn test_failing_dump_fails_domain() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = Arc::new(FakeDumpTool::failing_on("analytics"));
        let adapter = DatabaseAdapter::new(vec!["shop".into(), "analytics".into()], tool);

        let err = adapter.backup(&ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, DrError::DomainBackupFailure { ref reason, .. } if reason.starts_with("analytics")));
    }

    #[tokio::test]
    async fn test_sandbox_restore_renames_databases() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = Arc::new(FakeDumpTool::default());
        let adapter = DatabaseAdapter::new(vec!["shop".into()], tool.clone());
        let result = adapter.backup(&ctx(dir.path())).await.unwrap();

        let decoded: Vec<DecodedArtifact> = result
            .artifacts
            .iter()
            .map(|a| DecodedArtifact { artifact: a.clone(), file: dir.path().join(&a.path) })
            .collect();
        let target = RestoreTarget::Sandbox { id: "drill_9".into(), root: dir.path().join("sb") };

        let report = adapter.restore(&decoded, &target).await.unwrap();
        assert_eq!(report.restored, vec!["shop_drill_9"]);
        assert_eq!(tool.restored(), vec!["shop_drill_9".to_string()]);
        adapter.verify_restore(&report, &target).await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_drops_only_sandbox_copies() {
        let tool = Arc::new(FakeDumpTool::default());
        let adapter = DatabaseAdapter::new(vec!["shop".into(), "analytics".into()], tool.clone());

        adapter.discard_sandbox(&RestoreTarget::Production).await.unwrap();
        assert!(tool.dropped().is_empty());

        let target = RestoreTarget::Sandbox { id: "drill_9".into(), root: "/tmp/sb".into() };
        adapter.discard_sandbox(&target).await.unwrap();
        assert_eq!(tool.dropped(), vec!["shop_drill_9".to_string(), "analytics_drill_9".to_string()]);
    }
}
