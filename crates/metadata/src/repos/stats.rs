//! Daily statistics repository.

use crate::error::StoreResult;
use crate::models::DailyStatRow;
use async_trait::async_trait;

/// Repository for per-credential per-day statistics. All rows use UTC
/// civil dates.
#[async_trait]
pub trait StatsRepo: Send + Sync {
    /// Today's row for one credential.
    async fn get_today(&self, credential_id: i64) -> StoreResult<Option<DailyStatRow>>;

    /// Today's rows for every credential.
    async fn get_all_for_today(&self) -> StoreResult<Vec<DailyStatRow>>;

    /// A specific credential/day pair.
    async fn get_for_day(&self, credential_id: i64, day: &str)
        -> StoreResult<Option<DailyStatRow>>;

    /// Bump today's call count, creating the row lazily, and remember the
    /// last observed client subnet.
    async fn increment_call_count(&self, credential_id: i64, subnet: &str) -> StoreResult<()>;

    /// Bump today's throttle count, creating the row lazily.
    async fn increment_throttle_count(&self, credential_id: i64) -> StoreResult<()>;

    /// Delete statistics older than the retention window. Returns the
    /// number of rows removed.
    async fn delete_older_than(&self, days: u32) -> StoreResult<u64>;
}
