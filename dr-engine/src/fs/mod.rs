//! Filesystem helpers shared by the pipeline stages.

pub mod walker;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Serialize `value` as pretty JSON and move it into place atomically.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Remove a directory tree, ignoring a tree that is already gone.
pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Turn an absolute or relative path into a single safe path component.
///
/// The readable part is lossy, so a short digest of the full path keeps
/// distinct paths (`/srv/www/html`, `/srv/www_html`) apart.
pub fn flatten_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let flat: String = raw
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let digest = hex::encode(&Sha256::digest(raw.as_bytes())[..4]);
    if flat.is_empty() {
        format!("root-{digest}")
    } else {
        format!("{flat}-{digest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_flatten_path() {
        let flat = flatten_path(&PathBuf::from("/var/www/opencart"));
        assert!(flat.starts_with("var_www_opencart-"), "{flat}");
        assert_eq!(flat.len(), "var_www_opencart-".len() + 8);
        assert!(flatten_path(&PathBuf::from("/")).starts_with("root-"));
        assert!(flatten_path(&PathBuf::from("etc/app v2")).starts_with("etc_app_v2-"));
        assert_eq!(flat, flatten_path(&PathBuf::from("/var/www/opencart")));
    }

    #[test]
    fn test_flatten_path_keeps_lookalike_paths_apart() {
        let nested = flatten_path(&PathBuf::from("/srv/www/html"));
        let underscored = flatten_path(&PathBuf::from("/srv/www_html"));
        assert!(nested.starts_with("srv_www_html-"));
        assert!(underscored.starts_with("srv_www_html-"));
        assert_ne!(nested, underscored);
    }

    #[tokio::test]
    async fn test_write_json_atomic_replaces_file() -> std::io::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested/state.json");

        write_json_atomic(&path, &serde_json::json!({ "n": 1 })).await?;
        write_json_atomic(&path, &serde_json::json!({ "n": 2 })).await?;

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(value["n"], 2);
        assert!(!path.with_extension("json.tmp").exists());
        Ok(())
    }
}
