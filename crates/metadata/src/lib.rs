//! Credential store abstraction and implementations for keypool.
//!
//! This crate provides the control-plane data model:
//! - Pooled credential records and lifecycle counters
//! - Per-credential per-day statistics
//! - Store mutation events (write-through hooks)
//! - The process-local hot cache fronting the store

pub mod cache;
pub mod error;
pub mod events;
pub mod models;
pub mod repos;
pub mod store;

pub use cache::{CacheStatus, HotCache, Snapshot};
pub use error::{StoreError, StoreResult};
pub use events::{StoreEvent, StoreListener};
pub use models::{civil_day, today_utc, CredentialRow, DailyStatRow};
pub use repos::{CredentialRepo, StatsRepo};
pub use store::{KeyStore, SqliteStore};
