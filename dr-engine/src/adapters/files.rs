//! Filesystem trees: one archive per configured directory.

use super::{BackupContext, ComponentAdapter, DecodedArtifact, RestoreReport, RestoreTarget};
use crate::fs::flatten_path;
use crate::fs::walker::{count_files, WalkOptions};
use crate::model::{ComponentResult, Domain};
use crate::tools::ArchiveTool;
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct FilesAdapter {
    directories: Vec<PathBuf>,
    archiver: Arc<dyn ArchiveTool>,
}

impl FilesAdapter {
    /// Repeated directories are archived once.
    pub fn new(mut directories: Vec<PathBuf>, archiver: Arc<dyn ArchiveTool>) -> Self {
        let mut seen = HashSet::new();
        directories.retain(|d| seen.insert(d.clone()));
        Self { directories, archiver }
    }
}

#[async_trait]
impl ComponentAdapter for FilesAdapter {
    fn domain(&self) -> Domain {
        Domain::Files
    }

    async fn backup(&self, ctx: &BackupContext) -> Result<ComponentResult> {
        if self.directories.is_empty() {
            return Err(DrError::DomainBackupFailure {
                domain: Domain::Files.to_string(),
                reason: "no directories configured".into(),
            });
        }
        let dir = ctx.domain_dir(Domain::Files).await?;
        let mut artifacts = Vec::with_capacity(self.directories.len());
        let mut total_files = 0u64;

        for source in &self.directories {
            ctx.check_cancelled()?;
            let dest = dir.join(format!("{}.tar", flatten_path(source)));
            let stats = self
                .archiver
                .archive_directory(source, &dest)
                .await
                .map_err(|e| DrError::DomainBackupFailure {
                    domain: Domain::Files.to_string(),
                    reason: format!("{}: {e}", source.display()),
                })?;
            let artifact = ctx.finalize(&source.to_string_lossy(), &dest, stats.files).await?;
            info!(
                "Archived {} ({} files, {} bytes)",
                source.display(),
                stats.files,
                stats.bytes
            );
            total_files += stats.files;
            artifacts.push(artifact);
        }

        Ok(ComponentResult::success(Domain::Files, artifacts, total_files))
    }

    async fn restore(&self, artifacts: &[DecodedArtifact], target: &RestoreTarget) -> Result<RestoreReport> {
        let mut report = RestoreReport::new(Domain::Files);

        for decoded in artifacts {
            let dest = target.directory_for(Path::new(&decoded.artifact.name));
            let stats = self.archiver.extract_archive(&decoded.file, &dest).await?;
            info!("Extracted {} files into {}", stats.files, dest.display());
            report.items += stats.files;
            report.expected_items += decoded.artifact.items;
            report.restored.push(dest.to_string_lossy().into_owned());
        }
        Ok(report)
    }

    async fn verify_restore(&self, report: &RestoreReport, _target: &RestoreTarget) -> Result<()> {
        let options = WalkOptions::default();
        let mut on_disk = 0u64;
        for dir in &report.restored {
            on_disk += count_files(Path::new(dir), &options)? as u64;
        }
        if on_disk < report.expected_items {
            return Err(DrError::RecoveryStageFailure {
                stage: "verify".into(),
                reason: format!(
                    "files: {} of {} restored files present on disk",
                    on_disk, report.expected_items
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::TarArchiver;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_backup_and_sandbox_restore() {
        let site = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(site.path().join("catalog/view")).unwrap();
        std::fs::write(site.path().join("index.php"), "<?php").unwrap();
        std::fs::write(site.path().join("catalog/view/home.twig"), "{{ title }}").unwrap();

        let work = tempfile::TempDir::new().unwrap();
        let ctx = BackupContext {
            backup_id: "backup_f".into(),
            job_dir: work.path().join("backup_f"),
            cancel: CancellationToken::new(),
        };
        let adapter = FilesAdapter::new(vec![site.path().to_path_buf()], Arc::new(TarArchiver::default()));

        let result = adapter.backup(&ctx).await.unwrap();
        assert_eq!(result.item_count, 2);
        assert_eq!(result.artifacts.len(), 1);
        assert!(result.artifacts[0].path.starts_with("files/"));

        let artifact = result.artifacts[0].clone();
        let decoded = vec![DecodedArtifact {
            file: ctx.job_dir.join(&artifact.path),
            artifact,
        }];
        let target = RestoreTarget::Sandbox { id: "drill_f".into(), root: work.path().join("sandbox") };
        let report = adapter.restore(&decoded, &target).await.unwrap();

        assert_eq!(report.items, 2);
        let restored = PathBuf::from(&report.restored[0]);
        assert!(restored.starts_with(work.path().join("sandbox/files")));
        assert!(restored.join("catalog/view/home.twig").exists());
        adapter.verify_restore(&report, &target).await.unwrap();
    }

    #[tokio::test]
    async fn test_lookalike_directories_get_separate_artifacts() {
        let live = tempfile::TempDir::new().unwrap();
        let nested = live.path().join("www/html");
        let underscored = live.path().join("www_html");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(&underscored).unwrap();
        std::fs::write(nested.join("index.php"), "nested").unwrap();
        std::fs::write(underscored.join("index.php"), "underscored").unwrap();

        let work = tempfile::TempDir::new().unwrap();
        let ctx = BackupContext {
            backup_id: "backup_l".into(),
            job_dir: work.path().join("backup_l"),
            cancel: CancellationToken::new(),
        };
        let adapter = FilesAdapter::new(
            vec![nested.clone(), underscored.clone(), nested.clone()],
            Arc::new(TarArchiver::default()),
        );

        let result = adapter.backup(&ctx).await.unwrap();
        assert_eq!(result.artifacts.len(), 2);
        assert_ne!(result.artifacts[0].path, result.artifacts[1].path);
        for artifact in &result.artifacts {
            let fresh = crate::integrity::checksum_file(&ctx.job_dir.join(&artifact.path)).await.unwrap();
            assert_eq!(fresh, artifact.checksum);
        }

        let target = RestoreTarget::Sandbox { id: "drill_l".into(), root: work.path().join("sandbox") };
        let decoded: Vec<DecodedArtifact> = result
            .artifacts
            .iter()
            .map(|a| DecodedArtifact {
                file: ctx.job_dir.join(&a.path),
                artifact: a.clone(),
            })
            .collect();
        let report = adapter.restore(&decoded, &target).await.unwrap();
        let first = std::fs::read_to_string(target.directory_for(&nested).join("index.php")).unwrap();
        let second = std::fs::read_to_string(target.directory_for(&underscored).join("index.php")).unwrap();
        assert_eq!(first, "nested");
        assert_eq!(second, "underscored");
        adapter.verify_restore(&report, &target).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_fails_domain() {
        let work = tempfile::TempDir::new().unwrap();
        let ctx = BackupContext {
            backup_id: "backup_f".into(),
            job_dir: work.path().to_path_buf(),
            cancel: CancellationToken::new(),
        };
        let adapter = FilesAdapter::new(vec![work.path().join("nope")], Arc::new(TarArchiver::default()));
        assert!(matches!(
            adapter.backup(&ctx).await,
            Err(DrError::DomainBackupFailure { .. })
        ));
    }
}
