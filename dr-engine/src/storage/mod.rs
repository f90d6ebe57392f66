//! Remote storage collaborator.
//!
//! The pipeline addresses remote objects by key (`<backup id>/<stored path>`)
//! and never assumes anything about the transport behind it.

pub mod http;
pub mod local;

pub use http::HttpStorage;
pub use local::LocalDirStorage;

use crate::config::RemoteConfig;
use crate::model::manifest::MANIFEST_FILE;
use crate::model::{Manifest, RecoveryPoint};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Human-readable backend description for logs.
    fn describe(&self) -> String;

    /// Store the file at `path` under `key`; returns the remote reference.
    async fn upload(&self, path: &Path, key: &str) -> Result<String>;

    /// Fetch `key` into `dest`, creating parent directories.
    async fn download(&self, key: &str, dest: &Path) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Remote key of a file belonging to a backup.
pub fn object_key(prefix: &str, relative: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), relative.trim_start_matches('/'))
}

/// Reject keys that could escape the storage namespace.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|c| c == ".." || c.is_empty()) {
        return Err(DrError::storage(format!("invalid object key '{key}'")));
    }
    Ok(())
}

/// Load a point's manifest from its local directory, falling back to the
/// remote copy (fetched into `scratch`) when the local one is gone.
pub async fn fetch_manifest(
    point: &RecoveryPoint,
    remote: Option<&dyn RemoteStorage>,
    scratch: &Path,
) -> Result<Manifest> {
    if let Some(dir) = point.local_dir() {
        let local = Path::new(dir).join(MANIFEST_FILE);
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            return Manifest::load(&local).await;
        }
    }
    match (point.remote_prefix(), remote) {
        (Some(prefix), Some(remote)) => {
            let dest = scratch.join(MANIFEST_FILE);
            remote.download(&object_key(prefix, MANIFEST_FILE), &dest).await?;
            Manifest::load(&dest).await
        }
        _ => Err(DrError::storage(format!(
            "manifest for {} is not available locally or remotely",
            point.backup_id
        ))),
    }
}

/// Build the configured backend; `None` when no remote is configured.
pub fn from_config(remote: &RemoteConfig) -> Result<Option<Arc<dyn RemoteStorage>>> {
    Ok(match remote {
        RemoteConfig::None => None,
        RemoteConfig::Local { dir } => Some(Arc::new(LocalDirStorage::new(dir.clone()))),
        RemoteConfig::Http { url, token } => Some(Arc::new(HttpStorage::new(url, token.clone())?)),
    })
}
