//! Structured-document source for marketplace and configuration data.

use crate::fs::write_json_atomic;
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Current document for `name`, or `None` when it does not exist.
    async fn export(&self, name: &str) -> Result<Option<Value>>;

    /// Replace the document for `name`.
    async fn import(&self, name: &str, doc: &Value) -> Result<()>;
}

/// One `<name>.json` file per document under a root directory.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(DrError::Config(format!("invalid document name '{name}'")));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

#[async_trait]
impl DocumentSource for JsonDirSource {
    async fn export(&self, name: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.path_for(name)?).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn import(&self, name: &str, doc: &Value) -> Result<()> {
        write_json_atomic(&self.path_for(name)?, doc).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_export_import() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = JsonDirSource::new(dir.path().join("marketplaces"));

        assert!(source.export("trendyol").await.unwrap().is_none());
        source.import("trendyol", &json!([{ "sku": "A-1" }])).await.unwrap();
        assert_eq!(source.export("trendyol").await.unwrap(), Some(json!([{ "sku": "A-1" }])));
        assert!(source.export("../etc").await.is_err());
    }
}
