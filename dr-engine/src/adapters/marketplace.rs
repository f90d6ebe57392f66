//! Marketplace integration records: one export document per marketplace.
//!
//! An export is a JSON array of records. A marketplace without records
//! exports an empty array; that is a valid, restorable state.

use super::{
    read_document, write_document, BackupContext, ComponentAdapter, DecodedArtifact, DocumentSource,
    RestoreReport, RestoreTarget,
};
use crate::model::{ComponentResult, Domain};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub struct MarketplaceAdapter {
    marketplaces: Vec<String>,
    source: Arc<dyn DocumentSource>,
}

impl MarketplaceAdapter {
    pub fn new(marketplaces: Vec<String>, source: Arc<dyn DocumentSource>) -> Self {
        Self { marketplaces, source }
    }

    fn sink(&self, target: &RestoreTarget) -> Arc<dyn DocumentSource> {
        match target.sandbox_documents(Domain::Marketplace) {
            Some(sandbox) => Arc::new(sandbox),
            None => self.source.clone(),
        }
    }
}

fn record_count(doc: &Value) -> Result<u64> {
    doc.as_array()
        .map(|records| records.len() as u64)
        .ok_or_else(|| DrError::DomainBackupFailure {
            domain: Domain::Marketplace.to_string(),
            reason: "export is not a record array".into(),
        })
}

#[async_trait]
impl ComponentAdapter for MarketplaceAdapter {
    fn domain(&self) -> Domain {
        Domain::Marketplace
    }

    async fn backup(&self, ctx: &BackupContext) -> Result<ComponentResult> {
        let dir = ctx.domain_dir(Domain::Marketplace).await?;
        let mut artifacts = Vec::with_capacity(self.marketplaces.len());
        let mut total_records = 0u64;

        for name in &self.marketplaces {
            ctx.check_cancelled()?;
            let doc = match self.source.export(name).await? {
                Some(doc) => doc,
                None => {
                    debug!("Marketplace {} has no records", name);
                    Value::Array(Vec::new())
                }
            };
            let records = record_count(&doc)?;

            let dest = dir.join(format!("{name}.json"));
            write_document(&dest, &doc).await?;
            artifacts.push(ctx.finalize(name, &dest, records).await?);
            info!("Exported {} records from marketplace {}", records, name);
            total_records += records;
        }

        Ok(ComponentResult::success(Domain::Marketplace, artifacts, total_records))
    }

    async fn restore(&self, artifacts: &[DecodedArtifact], target: &RestoreTarget) -> Result<RestoreReport> {
        let sink = self.sink(target);
        let mut report = RestoreReport::new(Domain::Marketplace);

        for decoded in artifacts {
            let doc = read_document(&decoded.file).await?;
            let records = record_count(&doc)?;
            sink.import(&decoded.artifact.name, &doc).await?;
            report.items += records;
            report.expected_items += decoded.artifact.items;
            report.restored.push(decoded.artifact.name.clone());
        }
        Ok(report)
    }

    async fn verify_restore(&self, report: &RestoreReport, target: &RestoreTarget) -> Result<()> {
        let sink = self.sink(target);
        let mut present = 0u64;
        for name in &report.restored {
            if let Some(doc) = sink.export(name).await? {
                present += record_count(&doc)?;
            }
        }
        if present < report.expected_items {
            return Err(DrError::RecoveryStageFailure {
                stage: "verify".into(),
                reason: format!("marketplace: {} of {} records present", present, report.expected_items),
            });
        }
        Ok(())
    }
}
