//! Statistics janitor.
//!
//! Deletes daily statistics older than the retention window, at process
//! start and on every interval tick. Failures are logged, never propagated.

use keypool_metadata::{KeyStore, StatsRepo};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the janitor task. The first sweep runs immediately.
pub fn spawn_janitor(
    store: Arc<dyn KeyStore>,
    retention_days: u32,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match store.delete_older_than(retention_days).await {
                Ok(0) => {
                    tracing::debug!(retention_days, "statistics sweep found nothing to delete");
                }
                Ok(deleted) => {
                    tracing::info!(deleted, retention_days, "statistics sweep deleted old rows");
                }
                Err(e) => {
                    tracing::error!(error = %e, "statistics sweep failed");
                }
            }
        }
    })
}
