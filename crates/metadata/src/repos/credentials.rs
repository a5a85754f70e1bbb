//! Credential repository.

use crate::error::StoreResult;
use crate::models::CredentialRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for pooled credential records.
#[async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Insert a credential. The fingerprint and display form are derived
    /// from the material, which is encrypted at rest. Fails with
    /// `Duplicate` when the fingerprint already exists.
    async fn create(&self, material: &str) -> StoreResult<CredentialRow>;

    /// Insert a credential only while the pool holds fewer than `cap`
    /// records. The capacity check and the insert are a single statement,
    /// so two concurrent enrollments cannot both squeeze past the gate.
    /// Returns `None` when the pool is at capacity.
    async fn create_if_below_cap(
        &self,
        material: &str,
        cap: u64,
    ) -> StoreResult<Option<CredentialRow>>;

    /// Look up by stable id.
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<CredentialRow>>;

    /// Look up by fingerprint, the only identity derived from presented
    /// credentials.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> StoreResult<Option<CredentialRow>>;

    /// All credentials whose block deadline is absent or has passed.
    async fn find_available(&self, now: OffsetDateTime) -> StoreResult<Vec<CredentialRow>>;

    /// Number of persisted credentials.
    async fn count(&self) -> StoreResult<u64>;

    /// Set or clear the block deadline.
    async fn set_block_deadline(
        &self,
        id: i64,
        deadline: Option<OffsetDateTime>,
    ) -> StoreResult<()>;

    /// Bump the consecutive auth-failure counter, returning the new value.
    async fn increment_auth_failures(&self, id: i64) -> StoreResult<i64>;

    /// Bump the consecutive throttle counter, returning the new value.
    async fn increment_throttles(&self, id: i64) -> StoreResult<i64>;

    /// Zero both counters, clear the block deadline, and stamp the last
    /// success time.
    async fn reset_counters(&self, id: i64) -> StoreResult<()>;

    /// Remove a credential (statistics cascade).
    async fn delete(&self, id: i64) -> StoreResult<()>;

    /// Remove a credential by fingerprint.
    async fn delete_by_fingerprint(&self, fingerprint: &str) -> StoreResult<()>;
}
