//! Directory traversal for archiving and size accounting.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Name fragments; any entry whose file name contains one is skipped,
    /// and excluded directories are not descended into.
    pub exclude_patterns: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            exclude_patterns: Vec::new(),
        }
    }
}

impl WalkOptions {
    pub fn excluding(patterns: &[String]) -> Self {
        Self {
            exclude_patterns: patterns.to_vec(),
            ..Self::default()
        }
    }
}

/// A regular file discovered during a walk.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the walk root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Symlinks are resolved to their target; links to directories and
    /// broken links yield `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => return Ok(None),
            }
        } else {
            entry.metadata()?
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
        }))
    }
}

/// Walk a directory tree and collect every regular file.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_exclude(e, &options.exclude_patterns));

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(info) = FileInfo::from_entry(&entry, root)? {
            files.push(info);
        }
    }

    Ok(files)
}

/// Count files in a directory
pub fn count_files(root: &Path, options: &WalkOptions) -> std::io::Result<usize> {
    Ok(walk_directory(root, options)?.len())
}

/// Total size of all files under `root`. A missing root counts as empty.
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    if !root.exists() {
        return Ok(0);
    }
    Ok(walk_directory(root, &WalkOptions::default())?
        .iter()
        .map(|f| f.size)
        .sum())
}

fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|p| file_name.contains(p.as_str()))
}
