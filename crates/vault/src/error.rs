//! Vault error types.

use thiserror::Error;

/// Encryption and key-management errors.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;
