//! Artifact encryption.
//!
//! The cipher is a collaborator: the pipeline only needs `encrypt` and
//! `decrypt` over whole artifacts plus a stable name to record in the
//! manifest. The shipped implementation is AES-256-GCM with a random
//! 96-bit nonce stored in front of the ciphertext.

use crate::utils::{DrError, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;

pub const KEY_ENV_VAR: &str = "DR_ENCRYPTION_KEY";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub trait Cipher: Send + Sync {
    /// Recorded in the manifest so recovery can pick the matching cipher.
    fn name(&self) -> &str;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| DrError::Crypto(format!("invalid hex key: {e}")))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| DrError::Crypto(format!("key must be {KEY_LEN} bytes, got {}", b.len())))?;
        Ok(Self::new(&key))
    }

    /// Load the key from `key_file`, falling back to `DR_ENCRYPTION_KEY`.
    pub fn load(key_file: Option<&Path>) -> Result<Self> {
        match key_file {
            Some(path) => {
                let encoded = std::fs::read_to_string(path).map_err(|e| {
                    DrError::Crypto(format!("cannot read key file {}: {e}", path.display()))
                })?;
                Self::from_hex(&encoded)
            }
            None => {
                let encoded = std::env::var(KEY_ENV_VAR).map_err(|_| {
                    DrError::Config(format!("encryption enabled but neither key_file nor {KEY_ENV_VAR} is set"))
                })?;
                Self::from_hex(&encoded)
            }
        }
    }
}

impl Cipher for Aes256GcmCipher {
    fn name(&self) -> &str {
        "aes-256-gcm"
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| DrError::Crypto(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(DrError::Crypto("ciphertext shorter than nonce".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DrError::Crypto("authentication failed (wrong key or corrupted artifact)".into()))
    }
}

/// Encrypt `src` into `dest`, returning the encrypted size.
pub async fn encrypt_file(cipher: Arc<dyn Cipher>, src: &Path, dest: &Path) -> Result<u64> {
    let plaintext = tokio::fs::read(src).await?;
    let sealed = tokio::task::spawn_blocking(move || cipher.encrypt(&plaintext))
        .await
        .map_err(|e| DrError::Crypto(format!("encryption task failed: {e}")))??;
    tokio::fs::write(dest, &sealed).await?;
    Ok(sealed.len() as u64)
}

/// Decrypt `src` into `dest`, returning the plaintext size.
pub async fn decrypt_file(cipher: Arc<dyn Cipher>, src: &Path, dest: &Path) -> Result<u64> {
    let data = tokio::fs::read(src).await?;
    let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt(&data))
        .await
        .map_err(|e| DrError::Crypto(format!("decryption task failed: {e}")))??;
    tokio::fs::write(dest, &plaintext).await?;
    Ok(plaintext.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_nonce_is_random_per_call() {
        let cipher = Aes256GcmCipher::from_hex(KEY_HEX).unwrap();
        let a = cipher.encrypt(b"settings").unwrap();
        let b = cipher.encrypt(b"settings").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), b"settings");
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let cipher = Aes256GcmCipher::from_hex(KEY_HEX).unwrap();
        let other = Aes256GcmCipher::new(&[7u8; 32]);
        let sealed = cipher.encrypt(b"secret").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(DrError::Crypto(_))));
    }

    #[test]
    fn test_short_key_is_rejected() {
        assert!(Aes256GcmCipher::from_hex("abcd").is_err());
        assert!(Aes256GcmCipher::from_hex("zz").is_err());
    }

    #[tokio::test]
    async fn test_file_encryption() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("security.json");
        let enc = dir.path().join("security.json.enc");
        let out = dir.path().join("security.out.json");
        std::fs::write(&src, br#"{"two_factor":true}"#).unwrap();

        let cipher: Arc<dyn Cipher> = Arc::new(Aes256GcmCipher::from_hex(KEY_HEX).unwrap());
        let size = encrypt_file(cipher.clone(), &src, &enc).await.unwrap();
        assert_eq!(size, 19 + 12 + 16);
        assert_ne!(std::fs::read(&enc).unwrap(), std::fs::read(&src).unwrap());

        decrypt_file(cipher, &enc, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), br#"{"two_factor":true}"#);
    }

    #[test]
    fn test_load_from_key_file() {
        let dir = TempDir::new().unwrap();
        let key_file = dir.path().join("dr.key");
        std::fs::write(&key_file, format!("{KEY_HEX}\n")).unwrap();
        let cipher = Aes256GcmCipher::load(Some(&key_file)).unwrap();
        assert_eq!(cipher.name(), "aes-256-gcm");
    }
}
