//! Reversible artifact transforms applied between verification and upload.
//!
//! Each transform appends a suffix to the stored path (`.zst`, `.enc`), so
//! the stored path alone tells recovery which transforms to undo and in
//! which order.

pub mod compression;
pub mod encryption;

pub use compression::{compress_file, decompress_file};
pub use encryption::{decrypt_file, encrypt_file, Aes256GcmCipher, Cipher};

use crate::config::PipelineConfig;
use crate::utils::Result;
use std::sync::Arc;

pub const COMPRESSED_SUFFIX: &str = ".zst";
pub const ENCRYPTED_SUFFIX: &str = ".enc";

pub fn with_suffix(path: &str, suffix: &str) -> String {
    format!("{path}{suffix}")
}

/// Strip `suffix` from a stored path, if present.
pub fn without_suffix<'a>(path: &'a str, suffix: &str) -> Option<&'a str> {
    path.strip_suffix(suffix).filter(|p| !p.is_empty())
}

/// Build the configured cipher; `None` when encryption is disabled.
pub fn cipher_from_config(pipeline: &PipelineConfig) -> Result<Option<Arc<dyn Cipher>>> {
    if !pipeline.encryption {
        return Ok(None);
    }
    let cipher = Aes256GcmCipher::load(pipeline.key_file.as_deref())?;
    Ok(Some(Arc::new(cipher)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_helpers() {
        let stored = with_suffix(&with_suffix("database/shop.sql", COMPRESSED_SUFFIX), ENCRYPTED_SUFFIX);
        assert_eq!(stored, "database/shop.sql.zst.enc");

        let decrypted = without_suffix(&stored, ENCRYPTED_SUFFIX).unwrap();
        assert_eq!(without_suffix(decrypted, COMPRESSED_SUFFIX), Some("database/shop.sql"));
        assert_eq!(without_suffix("database/shop.sql", ENCRYPTED_SUFFIX), None);
    }

    #[test]
    fn test_cipher_disabled_by_default() {
        assert!(cipher_from_config(&PipelineConfig::default()).unwrap().is_none());
    }
}
