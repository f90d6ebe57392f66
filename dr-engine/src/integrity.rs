//! Artifact checksums and verification.
//!
//! Every artifact carries two SHA-256 digests: one of its raw content, taken
//! as soon as the adapter finalises the file, and one of the stored form
//! after compression and encryption. The verifier recomputes either digest
//! and compares it to the recorded value; it never modifies an artifact.

use crate::model::ArtifactRef;
use crate::utils::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

const READ_BUFFER: usize = 64 * 1024;

/// SHA-256 of a file, hex encoded.
pub async fn checksum_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    Ok(digest)
}

pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Which recorded digest an artifact is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumTarget {
    /// Raw content at `ArtifactRef::path`.
    Content,
    /// Post-transform form at `ArtifactRef::stored_path()`.
    Stored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactCheck {
    pub path: String,
    pub expected: String,
    pub actual: Option<String>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub checks: Vec<ArtifactCheck>,
    pub passed: bool,
}

impl VerificationResult {
    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Recompute each artifact's checksum under `root` and compare it with
    /// the recorded value. Missing or unreadable files fail their check.
    pub async fn verify(
        &self,
        root: &Path,
        artifacts: &[ArtifactRef],
        target: ChecksumTarget,
    ) -> VerificationResult {
        let files: Vec<(PathBuf, String)> = artifacts
            .iter()
            .map(|artifact| match target {
                ChecksumTarget::Content => (root.join(&artifact.path), artifact.checksum.clone()),
                ChecksumTarget::Stored => (
                    root.join(artifact.stored_path()),
                    artifact.stored_checksum().to_string(),
                ),
            })
            .collect();
        self.verify_files(&files).await
    }

    /// Check absolute paths against expected digests.
    pub async fn verify_files(&self, files: &[(PathBuf, String)]) -> VerificationResult {
        let mut checks = Vec::with_capacity(files.len());

        for (path, expected) in files {
            let check = match checksum_file(path).await {
                Ok(actual) => ArtifactCheck {
                    path: path.display().to_string(),
                    expected: expected.clone(),
                    passed: &actual == expected,
                    actual: Some(actual),
                    error: None,
                },
                Err(e) => ArtifactCheck {
                    path: path.display().to_string(),
                    expected: expected.clone(),
                    actual: None,
                    passed: false,
                    error: Some(e.to_string()),
                },
            };

            if !check.passed {
                tracing::warn!(path = %check.path, error = ?check.error, "Checksum mismatch");
            }
            checks.push(check);
        }

        let passed = checks.iter().all(|c| c.passed);
        VerificationResult { checks, passed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact_for(root: &Path, rel: &str, content: &[u8]) -> ArtifactRef {
        std::fs::write(root.join(rel), content).unwrap();
        ArtifactRef {
            name: rel.to_string(),
            path: rel.to_string(),
            size: content.len() as u64,
            checksum: checksum_bytes(content),
            items: 0,
            stored: None,
            remote_key: None,
        }
    }

    #[tokio::test]
    async fn test_checksum_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.sql");
        std::fs::write(&path, b"CREATE TABLE oc_product (id INT);").unwrap();

        let digest = checksum_file(&path).await.unwrap();
        assert_eq!(digest, checksum_bytes(b"CREATE TABLE oc_product (id INT);"));
        assert_eq!(digest.len(), 64);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let good = artifact_for(dir.path(), "a.json", b"[1,2,3]");
        let bad = artifact_for(dir.path(), "b.json", b"{}");
        std::fs::write(dir.path().join("b.json"), b"{\"x\":1}").unwrap();

        let result = IntegrityVerifier::new()
            .verify(dir.path(), &[good, bad], ChecksumTarget::Content)
            .await;

        assert!(!result.passed);
        assert_eq!(result.failed_count(), 1);
        assert!(result.checks[0].passed);
        assert!(result.checks[1].path.ends_with("b.json"));
    }

    #[tokio::test]
    async fn test_verify_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut artifact = artifact_for(dir.path(), "c.tar", b"archive");
        artifact.path = "gone.tar".into();

        let result = IntegrityVerifier::new()
            .verify(dir.path(), &[artifact], ChecksumTarget::Content)
            .await;

        assert!(!result.passed);
        assert!(result.checks[0].error.is_some());
    }

    #[tokio::test]
    async fn test_verify_empty_set_passes() {
        let dir = TempDir::new().unwrap();
        let result = IntegrityVerifier::new()
            .verify(dir.path(), &[], ChecksumTarget::Stored)
            .await;
        assert!(result.passed);
    }
}
