//! At-rest encryption for pooled credentials.
//!
//! This crate provides:
//! - AES-256-GCM sealing of credential material
//! - Encryption key loading (environment, config, persisted key file)

pub mod cipher;
pub mod error;
pub mod key;

pub use cipher::Vault;
pub use error::{VaultError, VaultResult};
pub use key::{EncryptionKey, KeySource};
