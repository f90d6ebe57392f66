//! Directory archiving with `tar`.
//!
//! Archives are plain tar; the pipeline's compression stage applies zstd on
//! top, so archiving and compressing stay independently togglable.

use super::{ArchiveStats, ArchiveTool};
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct TarArchiver {
    options: WalkOptions,
}

impl TarArchiver {
    pub fn new(exclude_patterns: &[String]) -> Self {
        Self {
            options: WalkOptions::excluding(exclude_patterns),
        }
    }
}

fn archive_blocking(src: &Path, dest: &Path, options: &WalkOptions) -> std::io::Result<ArchiveStats> {
    if !src.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", src.display()),
        ));
    }

    let files = walk_directory(src, options)?;
    let out = std::fs::File::create(dest)?;
    let mut builder = tar::Builder::new(std::io::BufWriter::new(out));
    builder.follow_symlinks(options.follow_links);

    let mut stats = ArchiveStats::default();
    for file in &files {
        builder.append_path_with_name(&file.path, &file.relative_path)?;
        stats.files += 1;
        stats.bytes += file.size;
    }

    builder.into_inner()?.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(stats)
}

fn extract_blocking(archive: &Path, dest: &Path) -> std::io::Result<ArchiveStats> {
    std::fs::create_dir_all(dest)?;
    let file = std::fs::File::open(archive)?;
    let mut reader = tar::Archive::new(std::io::BufReader::new(file));

    let mut stats = ArchiveStats::default();
    for entry in reader.entries()? {
        let mut entry = entry?;
        let size = entry.header().size()?;
        let is_file = entry.header().entry_type().is_file();
        // unpack_in refuses paths escaping `dest`
        if entry.unpack_in(dest)? && is_file {
            stats.files += 1;
            stats.bytes += size;
        }
    }
    Ok(stats)
}

#[async_trait]
impl ArchiveTool for TarArchiver {
    async fn archive_directory(&self, src: &Path, dest: &Path) -> Result<ArchiveStats> {
        let (src, dest, options): (PathBuf, PathBuf, WalkOptions) =
            (src.to_path_buf(), dest.to_path_buf(), self.options.clone());
        let stats = tokio::task::spawn_blocking(move || {
            let result = archive_blocking(&src, &dest, &options);
            if result.is_err() {
                let _ = std::fs::remove_file(&dest);
            }
            result
        })
        .await
        .map_err(|e| DrError::tool(format!("archive task failed: {e}")))?
        .map_err(|e| DrError::tool(format!("archive failed: {e}")))?;
        Ok(stats)
    }

    async fn extract_archive(&self, archive: &Path, dest: &Path) -> Result<ArchiveStats> {
        let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
        let stats = tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
            .await
            .map_err(|e| DrError::tool(format!("extract task failed: {e}")))?
            .map_err(|e| DrError::tool(format!("extract failed: {e}")))?;
        Ok(stats)
    }
}
