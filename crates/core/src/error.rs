//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("credential length {0} outside allowed range 16..=256")]
    CredentialLength(usize),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid validation rule: {0}")]
    InvalidRule(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
