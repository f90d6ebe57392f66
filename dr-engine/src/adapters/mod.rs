//! Domain adapters.
//!
//! One adapter per [`Domain`], all with the same result shape so the
//! orchestrators treat them uniformly. A new domain is added by
//! implementing [`ComponentAdapter`]; the orchestrators do not change.
//!
//! Adapters write their artifacts beneath `<job dir>/<domain>/` and return
//! paths relative to the job directory. The checksum of each artifact is
//! taken by [`BackupContext::finalize`] as soon as the file is complete.

pub mod configuration;
pub mod database;
pub mod documents;
pub mod files;
pub mod marketplace;

pub use configuration::ConfigurationAdapter;
pub use database::DatabaseAdapter;
pub use documents::{DocumentSource, JsonDirSource};
pub use files::FilesAdapter;
pub use marketplace::MarketplaceAdapter;

use crate::config::DomainsConfig;
use crate::fs::flatten_path;
use crate::integrity::checksum_file;
use crate::model::{ArtifactRef, ComponentResult, Domain};
use crate::tools::{ArchiveTool, CommandDumpTool, DumpTool, TarArchiver};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ComponentAdapter: Send + Sync {
    fn domain(&self) -> Domain;

    /// Capture this domain. An `Err` becomes a failed `ComponentResult`;
    /// it never aborts the other domains.
    async fn backup(&self, ctx: &BackupContext) -> Result<ComponentResult>;

    /// Load decoded artifacts into `target`.
    async fn restore(&self, artifacts: &[DecodedArtifact], target: &RestoreTarget) -> Result<RestoreReport>;

    /// Post-restore check that the target actually holds what was restored.
    async fn verify_restore(&self, report: &RestoreReport, _target: &RestoreTarget) -> Result<()> {
        if report.items < report.expected_items {
            return Err(DrError::RecoveryStageFailure {
                stage: "verify".into(),
                reason: format!(
                    "{}: restored {} of {} items",
                    report.domain, report.items, report.expected_items
                ),
            });
        }
        Ok(())
    }

    /// Release whatever a sandbox restore created outside the sandbox root.
    async fn discard_sandbox(&self, _target: &RestoreTarget) -> Result<()> {
        Ok(())
    }
}

pub type AdapterSet = BTreeMap<Domain, Arc<dyn ComponentAdapter>>;

// ── Backup side ──

#[derive(Debug, Clone)]
pub struct BackupContext {
    pub backup_id: String,
    /// `<artifact root>/<backup id>`
    pub job_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl BackupContext {
    /// Directory for `domain`'s artifacts, created on demand.
    pub async fn domain_dir(&self, domain: Domain) -> Result<PathBuf> {
        let dir = self.job_dir.join(domain.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Size and checksum a finished artifact file.
    pub async fn finalize(&self, name: &str, file: &Path, items: u64) -> Result<ArtifactRef> {
        let relative = file
            .strip_prefix(&self.job_dir)
            .map_err(|_| DrError::storage(format!("{} is outside the job directory", file.display())))?;
        let size = tokio::fs::metadata(file).await?.len();
        let checksum = checksum_file(file).await?;
        Ok(ArtifactRef {
            name: name.to_string(),
            path: relative.to_string_lossy().replace('\\', "/"),
            size,
            checksum,
            items,
            stored: None,
            remote_key: None,
        })
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DrError::Cancelled);
        }
        Ok(())
    }
}

// ── Restore side ──

/// Where a recovery writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RestoreTarget {
    /// The live system, at the locations the backup was taken from.
    Production,
    /// An isolated tree; nothing outside `root` is touched.
    Sandbox { id: String, root: PathBuf },
}

impl RestoreTarget {
    pub fn is_sandbox(&self) -> bool {
        matches!(self, RestoreTarget::Sandbox { .. })
    }

    /// Where a backed-up directory is restored to.
    pub fn directory_for(&self, original: &Path) -> PathBuf {
        match self {
            RestoreTarget::Production => original.to_path_buf(),
            RestoreTarget::Sandbox { root, .. } => {
                root.join(Domain::Files.as_str()).join(flatten_path(original))
            }
        }
    }

    /// Database that receives a restored dump.
    pub fn database_name(&self, original: &str) -> String {
        match self {
            RestoreTarget::Production => original.to_string(),
            RestoreTarget::Sandbox { id, .. } => format!("{original}_{id}"),
        }
    }

    /// Document sink for sandbox restores, `None` for production.
    pub fn sandbox_documents(&self, domain: Domain) -> Option<JsonDirSource> {
        match self {
            RestoreTarget::Production => None,
            RestoreTarget::Sandbox { root, .. } => Some(JsonDirSource::new(root.join(domain.as_str()))),
        }
    }
}

impl fmt::Display for RestoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreTarget::Production => f.write_str("production"),
            RestoreTarget::Sandbox { id, .. } => write!(f, "sandbox:{id}"),
        }
    }
}

/// An artifact whose transforms have been undone, ready to load.
#[derive(Debug, Clone)]
pub struct DecodedArtifact {
    pub artifact: ArtifactRef,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub domain: Domain,
    /// Items actually loaded (files, databases, records, settings)
    pub items: u64,
    /// Items recorded in the manifest for the restored artifacts
    pub expected_items: u64,
    /// Databases, directories or documents written
    pub restored: Vec<String>,
}

impl RestoreReport {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            items: 0,
            expected_items: 0,
            restored: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!("{} item(s) into {}", self.items, self.restored.join(", "))
    }
}

// ── Document helpers shared by the marketplace and configuration adapters ──

pub(crate) async fn write_document(path: &Path, doc: &serde_json::Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

pub(crate) async fn read_document(path: &Path) -> Result<serde_json::Value> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Build the adapters for every configured domain.
pub fn from_config(domains: &DomainsConfig) -> AdapterSet {
    let mut set: AdapterSet = BTreeMap::new();

    if let Some(db) = &domains.database {
        let tool: Arc<dyn DumpTool> = Arc::new(
            CommandDumpTool::new(db.dump_command.clone(), db.restore_command.clone())
                .with_drop_command(db.drop_command.clone()),
        );
        set.insert(Domain::Database, Arc::new(DatabaseAdapter::new(db.databases.clone(), tool)));
    }
    if let Some(files) = &domains.files {
        let archiver: Arc<dyn ArchiveTool> = Arc::new(TarArchiver::new(&files.exclude_patterns));
        set.insert(Domain::Files, Arc::new(FilesAdapter::new(files.directories.clone(), archiver)));
    }
    if let Some(mp) = &domains.marketplace {
        let source: Arc<dyn DocumentSource> = Arc::new(JsonDirSource::new(mp.source_dir.clone()));
        set.insert(
            Domain::Marketplace,
            Arc::new(MarketplaceAdapter::new(mp.marketplaces.clone(), source)),
        );
    }
    if let Some(cfg) = &domains.configuration {
        let source: Arc<dyn DocumentSource> = Arc::new(JsonDirSource::new(cfg.source_dir.clone()));
        set.insert(
            Domain::Configuration,
            Arc::new(ConfigurationAdapter::new(cfg.categories.clone(), source)),
        );
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_remapping() {
        let target = RestoreTarget::Sandbox {
            id: "drill_1".into(),
            root: PathBuf::from("/sandbox/drill_1"),
        };
        let restored = target.directory_for(Path::new("/var/www/opencart"));
        assert_eq!(restored.parent(), Some(Path::new("/sandbox/drill_1/files")));
        assert_ne!(restored, target.directory_for(Path::new("/var/www_opencart")));
        assert_eq!(target.database_name("shop"), "shop_drill_1");
        assert_eq!(target.to_string(), "sandbox:drill_1");

        let prod = RestoreTarget::Production;
        assert_eq!(prod.directory_for(Path::new("/var/www")), PathBuf::from("/var/www"));
        assert!(prod.sandbox_documents(Domain::Marketplace).is_none());
    }

    #[tokio::test]
    async fn test_finalize_checksums_relative_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = BackupContext {
            backup_id: "backup_1".into(),
            job_dir: dir.path().to_path_buf(),
            cancel: CancellationToken::new(),
        };
        let domain_dir = ctx.domain_dir(Domain::Database).await.unwrap();
        let file = domain_dir.join("shop.sql");
        std::fs::write(&file, b"-- dump").unwrap();

        let artifact = ctx.finalize("shop", &file, 1).await.unwrap();
        assert_eq!(artifact.path, "database/shop.sql");
        assert_eq!(artifact.size, 7);
        assert_eq!(artifact.checksum, crate::integrity::checksum_bytes(b"-- dump"));
    }
}
