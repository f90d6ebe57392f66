//! HTTP object storage: `PUT`/`GET`/`DELETE`/`HEAD` on `<base url>/<key>`.

use super::{validate_key, RemoteStorage};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStorage {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fail(key: &str, action: &str, resp: reqwest::Response) -> DrError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        DrError::storage(format!("{action} {key} failed with status {status}: {body}"))
    }
}

#[async_trait]
impl RemoteStorage for HttpStorage {
    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }

    async fn upload(&self, path: &Path, key: &str) -> Result<String> {
        let url = self.url(key)?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let resp = self
            .authorize(self.client.put(&url))
            .header("content-length", size.to_string())
            .header("content-type", "application/octet-stream")
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::fail(key, "upload", resp).await);
        }
        info!("Uploaded {} bytes to {}", size, url);
        Ok(key.to_string())
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let url = self.url(key)?;
        let resp = self.authorize(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(Self::fail(key, "download", resp).await);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        debug!("Downloaded {} bytes from {}", written, url);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self.authorize(self.client.delete(self.url(key)?)).send().await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::fail(key, "delete", resp).await)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self.authorize(self.client.head(self.url(key)?)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::fail(key, "head", resp).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let storage = HttpStorage::new("https://objects.example.net/dr/", None).unwrap();
        assert_eq!(
            storage.url("backup_1/manifest.json").unwrap(),
            "https://objects.example.net/dr/backup_1/manifest.json"
        );
        assert!(storage.url("../secrets").is_err());
        assert_eq!(storage.describe(), "http:https://objects.example.net/dr");
    }
}
