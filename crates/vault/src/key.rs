//! Encryption key material and loading policy.

use crate::error::{VaultError, VaultResult};
use rand::RngCore;
use std::path::Path;

/// Environment variable consulted before any other key source.
pub const KEY_ENV_VAR: &str = "KEYPOOL_ENCRYPTION_KEY";

/// Where a loaded key came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Config,
    KeyFile,
    Generated,
}

/// A 256-bit AES key.
///
/// Never logged and never serialized; the hex form only leaves the process
/// through the mode-0600 key file.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Parse from 64 hex characters.
    pub fn from_hex(s: &str) -> VaultResult<Self> {
        let trimmed = s.trim();
        if trimmed.len() != 64 {
            return Err(VaultError::InvalidKey(format!(
                "expected 64 hex characters, got {}",
                trimmed.len()
            )));
        }
        let bytes = hex::decode(trimmed).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Load the key, in precedence order: environment variable, configured
    /// value, existing key file. When all are absent a key is generated and
    /// persisted to `key_file` with mode 0600.
    pub fn load(configured: Option<&str>, key_file: &Path) -> VaultResult<(Self, KeySource)> {
        if let Ok(value) = std::env::var(KEY_ENV_VAR) {
            return Ok((Self::from_hex(&value)?, KeySource::Environment));
        }

        if let Some(value) = configured {
            return Ok((Self::from_hex(value)?, KeySource::Config));
        }

        if key_file.exists() {
            let contents = std::fs::read_to_string(key_file)?;
            return Ok((Self::from_hex(&contents)?, KeySource::KeyFile));
        }

        let key = Self::generate();
        write_key_file(key_file, &key.to_hex())?;
        tracing::warn!(
            path = %key_file.display(),
            "no encryption key configured, generated one and persisted it"
        );
        Ok((key, KeySource::Generated))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

#[cfg(unix)]
fn write_key_file(path: &Path, hex_key: &str) -> VaultResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(hex_key.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, hex_key: &str) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, hex_key)?;
    Ok(())
}
