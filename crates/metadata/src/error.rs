//! Store error types.

use thiserror::Error;

/// Credential store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate fingerprint: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("vault error: {0}")]
    Vault(#[from] keypool_vault::VaultError),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
