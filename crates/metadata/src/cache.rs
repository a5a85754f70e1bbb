//! Process-local hot cache fronting the key store.
//!
//! The request path never scans the database: selection reads a snapshot of
//! available credentials and today's statistics, refreshed at most every
//! `refresh_interval` (floored at sixty seconds) and patched eagerly by
//! store write-through events. Newly-blocked, newly-created, and deleted
//! credentials propagate immediately; a deadline that merely passes with
//! time re-enters on the next full refresh.

use crate::error::StoreResult;
use crate::events::{StoreEvent, StoreListener};
use crate::models::{today_utc, CredentialRow, DailyStatRow};
use crate::repos::{CredentialRepo, StatsRepo};
use crate::store::KeyStore;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Floor for the refresh interval, regardless of configuration.
const MIN_REFRESH_SECS: u64 = 60;

/// An immutable view of available credentials and today's statistics.
///
/// The credential sequence is shuffled once per refresh (Fisher–Yates) and
/// stays stable until the next refresh; it is the selector's only source of
/// randomness between refreshes.
#[derive(Clone)]
pub struct Snapshot {
    pub credentials: Vec<CredentialRow>,
    pub stats: HashMap<i64, DailyStatRow>,
    /// UTC civil date the statistics belong to.
    pub day: String,
    refreshed_at: Instant,
}

impl Snapshot {
    /// Time since this snapshot was built from a full store scan.
    pub fn age(&self) -> Duration {
        self.refreshed_at.elapsed()
    }
}

/// Cache observability for the health endpoint.
#[derive(Clone, Debug)]
pub struct CacheStatus {
    pub cached: bool,
    pub age_seconds: Option<u64>,
    pub key_count: usize,
    pub stats_count: usize,
}

/// The hot cache. Subscribes to store mutations at construction.
pub struct HotCache {
    store: Arc<dyn KeyStore>,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes refreshes so concurrent stale readers trigger one scan.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl HotCache {
    /// Create a cache over `store`, refreshing at least every
    /// `max(refresh_secs, 60)` seconds, and subscribe it to store events.
    pub fn new(store: Arc<dyn KeyStore>, refresh_secs: u64) -> Arc<Self> {
        let cache = Arc::new(Self {
            store: store.clone(),
            refresh_interval: Duration::from_secs(refresh_secs.max(MIN_REFRESH_SECS)),
            snapshot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        });
        let listener_cache: Arc<dyn StoreListener> = cache.clone();
        let listener: std::sync::Weak<dyn StoreListener> = Arc::downgrade(&listener_cache);
        store.register_listener(listener);
        cache
    }

    /// Current snapshot, refreshing synchronously when stale, absent, or
    /// built for a previous UTC day.
    pub async fn snapshot(&self) -> StoreResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Double-check: another caller may have refreshed while we waited.
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }
        self.refresh().await
    }

    /// Cache observability for the health endpoint.
    pub fn status(&self) -> CacheStatus {
        match self.snapshot.read().as_ref() {
            Some(snapshot) => CacheStatus {
                cached: true,
                age_seconds: Some(snapshot.age().as_secs()),
                key_count: snapshot.credentials.len(),
                stats_count: snapshot.stats.len(),
            },
            None => CacheStatus {
                cached: false,
                age_seconds: None,
                key_count: 0,
                stats_count: 0,
            },
        }
    }

    fn fresh(&self) -> Option<Arc<Snapshot>> {
        let guard = self.snapshot.read();
        let snapshot = guard.as_ref()?;
        if snapshot.age() > self.refresh_interval {
            return None;
        }
        if snapshot.day != today_utc() {
            // Date rollover: stats must be rebuilt for the new civil day.
            return None;
        }
        Some(snapshot.clone())
    }

    async fn refresh(&self) -> StoreResult<Arc<Snapshot>> {
        let now = OffsetDateTime::now_utc();
        let mut credentials = self.store.find_available(now).await?;
        credentials.shuffle(&mut rand::rng());

        let stats = self
            .store
            .get_all_for_today()
            .await?
            .into_iter()
            .map(|stat| (stat.credential_id, stat))
            .collect();

        let snapshot = Arc::new(Snapshot {
            credentials,
            stats,
            day: today_utc(),
            refreshed_at: Instant::now(),
        });

        tracing::debug!(
            keys = snapshot.credentials.len(),
            stats = snapshot.stats.len(),
            "hot cache refreshed"
        );

        *self.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Apply a patch to the current snapshot, if one exists. Readers hold
    /// `Arc` clones, so patches build a new snapshot and swap it in.
    fn patch(&self, apply: impl FnOnce(&mut Snapshot)) {
        let mut guard = self.snapshot.write();
        if let Some(current) = guard.as_ref() {
            let mut next = (**current).clone();
            apply(&mut next);
            *guard = Some(Arc::new(next));
        }
    }
}

impl StoreListener for HotCache {
    fn on_store_event(&self, event: &StoreEvent<'_>) {
        match event {
            StoreEvent::CredentialCreated(row) => {
                let row = (*row).clone();
                self.patch(|snapshot| snapshot.credentials.push(row));
            }
            StoreEvent::CredentialReset(row) | StoreEvent::CredentialUnblocked(row) => {
                let row = (*row).clone();
                self.patch(|snapshot| {
                    match snapshot.credentials.iter_mut().find(|c| c.id == row.id) {
                        Some(existing) => *existing = row,
                        None => snapshot.credentials.push(row),
                    }
                });
            }
            StoreEvent::CredentialBlocked { id, .. } => {
                let id = *id;
                self.patch(|snapshot| snapshot.credentials.retain(|c| c.id != id));
            }
            StoreEvent::CountersChanged {
                id,
                auth_failures,
                throttles,
            } => {
                let (id, auth_failures, throttles) = (*id, *auth_failures, *throttles);
                self.patch(|snapshot| {
                    if let Some(row) = snapshot.credentials.iter_mut().find(|c| c.id == id) {
                        row.auth_failures = auth_failures;
                        row.throttles = throttles;
                    }
                });
            }
            StoreEvent::CredentialDeleted { id } => {
                let id = *id;
                self.patch(|snapshot| {
                    snapshot.credentials.retain(|c| c.id != id);
                    snapshot.stats.remove(&id);
                });
            }
            StoreEvent::CallRecorded(stat) | StoreEvent::ThrottleRecorded(stat) => {
                let stat = (*stat).clone();
                self.patch(|snapshot| {
                    if stat.day == snapshot.day {
                        snapshot.stats.insert(stat.credential_id, stat);
                    }
                });
            }
        }
    }
}
