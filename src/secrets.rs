//! Encrypted-at-rest credentials, decrypted just-in-time.
//!
//! A credential blob (object-store config, deploy key) lives in the source
//! repository encrypted with AES-256-GCM. The key and IV are hex strings
//! handed to the run through environment variables by the CI secret store.
//! Decryption writes the plaintext into a private temporary file owned by a
//! [`TransientCredential`]; the file is removed when the guard is dropped.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::SecretError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

/// Where an encrypted credential lives and which environment variables hold
/// its key and IV.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SecretSpec {
    pub encrypted_file: PathBuf,
    pub key_env: String,
    pub iv_env: String,
}

impl SecretSpec {
    /// Decrypt using key/IV from the process environment.
    pub fn acquire(&self, base_dir: &Path) -> Result<TransientCredential, SecretError> {
        self.acquire_with(base_dir, |k| std::env::var(k).ok())
    }

    /// Decrypt using key/IV from `lookup`. Relative `encrypted_file` paths
    /// are taken from `base_dir`.
    pub fn acquire_with<F>(&self, base_dir: &Path, lookup: F) -> Result<TransientCredential, SecretError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = decode_env(&lookup, &self.key_env, KEY_LEN)?;
        let iv = decode_env(&lookup, &self.iv_env, IV_LEN)?;
        let path = base_dir.join(&self.encrypted_file);

        let ciphertext = fs::read(&path).map_err(|e| SecretError::Io {
            path: path.clone(),
            source: e,
        })?;
        let plaintext = decrypt(&key, &iv, &ciphertext, &path)?;
        let credential = TransientCredential::from_plaintext(&plaintext).map_err(|e| {
            SecretError::Io {
                path: path.clone(),
                source: e,
            }
        })?;
        info!("Decrypted {} into a transient credential", path.display());
        Ok(credential)
    }
}

fn decode_env<F>(lookup: &F, var: &str, expected: usize) -> Result<Zeroizing<Vec<u8>>, SecretError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = Zeroizing::new(lookup(var).ok_or_else(|| SecretError::MissingEnv {
        var: var.to_string(),
    })?);
    let bytes = Zeroizing::new(hex::decode(raw.trim()).map_err(|_| SecretError::InvalidHex {
        var: var.to_string(),
    })?);
    if bytes.len() != expected {
        return Err(SecretError::InvalidLength {
            var: var.to_string(),
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

fn decrypt(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    path: &Path,
) -> Result<Zeroizing<Vec<u8>>, SecretError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| SecretError::Decrypt {
            path: path.to_path_buf(),
        })
}

/// Encrypt `input` into `output` with a hex key/IV. Used by operators to
/// produce the blobs that [`SecretSpec`] points at.
pub fn encrypt_file(input: &Path, output: &Path, key_hex: &str, iv_hex: &str) -> Result<(), SecretError> {
    let key = Zeroizing::new(hex::decode(key_hex.trim()).map_err(|_| SecretError::InvalidHex {
        var: "key".to_string(),
    })?);
    let iv = hex::decode(iv_hex.trim()).map_err(|_| SecretError::InvalidHex {
        var: "iv".to_string(),
    })?;
    if key.len() != KEY_LEN {
        return Err(SecretError::InvalidLength {
            var: "key".to_string(),
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    if iv.len() != IV_LEN {
        return Err(SecretError::InvalidLength {
            var: "iv".to_string(),
            expected: IV_LEN,
            actual: iv.len(),
        });
    }

    let plaintext = Zeroizing::new(fs::read(input).map_err(|e| SecretError::Io {
        path: input.to_path_buf(),
        source: e,
    })?);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| SecretError::Encrypt {
            path: input.to_path_buf(),
        })?;
    fs::write(output, ciphertext).map_err(|e| SecretError::Io {
        path: output.to_path_buf(),
        source: e,
    })
}

/// A decrypted credential on disk for the lifetime of this value only.
///
/// The backing file is created readable by the current user only and is
/// deleted on drop. It is never placed inside an artifact directory.
pub struct TransientCredential {
    file: NamedTempFile,
}

impl TransientCredential {
    pub fn from_plaintext(plaintext: &[u8]) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("docs-deploy-credential-")
            .tempfile()?;
        file.write_all(plaintext)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for TransientCredential {
    fn drop(&mut self) {
        debug!("Removing transient credential {}", self.file.path().display());
    }
}

impl fmt::Debug for TransientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransientCredential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const IV: &str = "a0a1a2a3a4a5a6a7a8a9aaab";

    fn spec() -> SecretSpec {
        SecretSpec {
            encrypted_file: PathBuf::from("rclone.conf.enc"),
            key_env: "TEST_KEY".to_string(),
            iv_env: "TEST_IV".to_string(),
        }
    }

    fn lookup(key: &'static str, iv: &'static str) -> impl Fn(&str) -> Option<String> {
        move |var| match var {
            "TEST_KEY" => Some(key.to_string()),
            "TEST_IV" => Some(iv.to_string()),
            _ => None,
        }
    }

    fn encrypted_fixture(dir: &TempDir, contents: &[u8]) {
        let plain = dir.path().join("rclone.conf");
        fs::write(&plain, contents).unwrap();
        encrypt_file(&plain, &dir.path().join("rclone.conf.enc"), KEY, IV).unwrap();
        fs::remove_file(plain).unwrap();
    }

    #[test]
    fn decrypts_into_transient_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        encrypted_fixture(&dir, b"[IBMCOS]\ntype = s3\n");

        let credential = spec().acquire_with(dir.path(), lookup(KEY, IV)).unwrap();
        let path = credential.path().to_path_buf();
        assert_eq!(fs::read(&path).unwrap(), b"[IBMCOS]\ntype = s3\n");
        assert!(!path.starts_with(dir.path()));

        drop(credential);
        assert!(!path.exists());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let dir = TempDir::new().unwrap();
        encrypted_fixture(&dir, b"secret");
        let wrong = "ff0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
        let err = spec().acquire_with(dir.path(), lookup(wrong, IV)).unwrap_err();
        assert!(matches!(err, SecretError::Decrypt { .. }));
    }

    #[test]
    fn missing_env_is_reported_by_name() {
        let dir = TempDir::new().unwrap();
        let err = spec().acquire_with(dir.path(), |_| None).unwrap_err();
        assert!(err.to_string().contains("TEST_KEY"));
    }

    #[test]
    fn short_iv_is_rejected() {
        let dir = TempDir::new().unwrap();
        encrypted_fixture(&dir, b"secret");
        let err = spec().acquire_with(dir.path(), lookup(KEY, "a0a1")).unwrap_err();
        assert!(matches!(
            err,
            SecretError::InvalidLength {
                expected: IV_LEN,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn debug_output_is_redacted() {
        let credential = TransientCredential::from_plaintext(b"hunter2").unwrap();
        assert_eq!(format!("{credential:?}"), "TransientCredential(***)");
    }
}
