//! Core domain types and shared logic for the keypool proxy.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Credential fingerprints and display forms
//! - Request validation rules
//! - Application configuration

pub mod config;
pub mod credential;
pub mod error;
pub mod validation;

pub use config::{AppConfig, BlockingConfig, DatabaseConfig, ProviderConfig, ServerConfig};
pub use credential::{display_form, fingerprint, MAX_CREDENTIAL_LEN, MIN_CREDENTIAL_LEN};
pub use error::{Error, Result};
pub use validation::{RuleKind, ValidationRule};
