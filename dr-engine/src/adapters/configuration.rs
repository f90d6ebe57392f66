//! Configuration categories (system, security, integration, marketplace
//! settings), each exported as its own settings object.

use super::{
    read_document, write_document, BackupContext, ComponentAdapter, DecodedArtifact, DocumentSource,
    RestoreReport, RestoreTarget,
};
use crate::model::{ComponentResult, Domain};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct ConfigurationAdapter {
    categories: Vec<String>,
    source: Arc<dyn DocumentSource>,
}

impl ConfigurationAdapter {
    pub fn new(categories: Vec<String>, source: Arc<dyn DocumentSource>) -> Self {
        Self { categories, source }
    }

    fn sink(&self, target: &RestoreTarget) -> Arc<dyn DocumentSource> {
        match target.sandbox_documents(Domain::Configuration) {
            Some(sandbox) => Arc::new(sandbox),
            None => self.source.clone(),
        }
    }
}

fn setting_count(category: &str, doc: &Value) -> Result<u64> {
    doc.as_object()
        .map(|settings| settings.len() as u64)
        .ok_or_else(|| DrError::DomainBackupFailure {
            domain: Domain::Configuration.to_string(),
            reason: format!("category {category} is not a settings object"),
        })
}

#[async_trait]
impl ComponentAdapter for ConfigurationAdapter {
    fn domain(&self) -> Domain {
        Domain::Configuration
    }

    async fn backup(&self, ctx: &BackupContext) -> Result<ComponentResult> {
        let dir = ctx.domain_dir(Domain::Configuration).await?;
        let mut artifacts = Vec::with_capacity(self.categories.len());

        for category in &self.categories {
            ctx.check_cancelled()?;
            // Unlike marketplace exports, a missing category means lost configuration
            let doc = self.source.export(category).await?.ok_or_else(|| DrError::DomainBackupFailure {
                domain: Domain::Configuration.to_string(),
                reason: format!("category {category} not found"),
            })?;
            let settings = setting_count(category, &doc)?;

            let dest = dir.join(format!("{category}.json"));
            write_document(&dest, &doc).await?;
            artifacts.push(ctx.finalize(category, &dest, settings).await?);
        }

        info!("Exported {} configuration categories", artifacts.len());
        let count = artifacts.len() as u64;
        Ok(ComponentResult::success(Domain::Configuration, artifacts, count))
    }

    async fn restore(&self, artifacts: &[DecodedArtifact], target: &RestoreTarget) -> Result<RestoreReport> {
        let sink = self.sink(target);
        let mut report = RestoreReport::new(Domain::Configuration);

        for decoded in artifacts {
            let doc = read_document(&decoded.file).await?;
            setting_count(&decoded.artifact.name, &doc)?;
            sink.import(&decoded.artifact.name, &doc).await?;
            report.items += 1;
            report.restored.push(decoded.artifact.name.clone());
        }
        report.expected_items = artifacts.len() as u64;
        Ok(report)
    }

    async fn verify_restore(&self, report: &RestoreReport, target: &RestoreTarget) -> Result<()> {
        let sink = self.sink(target);
        for category in &report.restored {
            if sink.export(category).await?.is_none() {
                return Err(DrError::RecoveryStageFailure {
                    stage: "verify".into(),
                    reason: format!("configuration category {category} missing after restore"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonDirSource;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_missing_category_fails_domain() {
        let live = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let source = Arc::new(JsonDirSource::new(live.path().to_path_buf()));
        source.import("system", &json!({ "maintenance": false })).await.unwrap();

        let adapter = ConfigurationAdapter::new(vec!["system".into(), "security".into()], source);
        let ctx = BackupContext {
            backup_id: "backup_c".into(),
            job_dir: work.path().to_path_buf(),
            cancel: CancellationToken::new(),
        };

        let err = adapter.backup(&ctx).await.unwrap_err();
        assert!(matches!(err, DrError::DomainBackupFailure { ref reason, .. } if reason.contains("security")));
    }

    #[tokio::test]
    async fn test_production_restore_writes_back_to_source() {
        let live = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let source = Arc::new(JsonDirSource::new(live.path().to_path_buf()));
        source.import("security", &json!({ "two_factor": true, "session_ttl": 3600 })).await.unwrap();

        let adapter = ConfigurationAdapter::new(vec!["security".into()], source.clone());
        let ctx = BackupContext {
            backup_id: "backup_c".into(),
            job_dir: work.path().to_path_buf(),
            cancel: CancellationToken::new(),
        };
        let result = adapter.backup(&ctx).await.unwrap();
        assert_eq!(result.artifacts[0].items, 2);

        source.import("security", &json!({ "two_factor": false })).await.unwrap();
        let decoded = vec![DecodedArtifact {
            artifact: result.artifacts[0].clone(),
            file: work.path().join(&result.artifacts[0].path),
        }];
        let report = adapter.restore(&decoded, &RestoreTarget::Production).await.unwrap();
        adapter.verify_restore(&report, &RestoreTarget::Production).await.unwrap();

        let restored = source.export("security").await.unwrap().unwrap();
        assert_eq!(restored["two_factor"], true);
    }
}
