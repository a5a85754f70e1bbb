//! Key store trait and the SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::events::{StoreEvent, StoreListener};
use crate::models::{civil_day, today_utc, CredentialRow, DailyStatRow};
use crate::repos::{CredentialRepo, StatsRepo};
use async_trait::async_trait;
use keypool_vault::Vault;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Weak;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined key store trait.
#[async_trait]
pub trait KeyStore: CredentialRepo + StatsRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;

    /// Subscribe to store mutations. Listeners are weak references; a
    /// dropped listener is pruned on the next notification.
    fn register_listener(&self, listener: Weak<dyn StoreListener>);
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    material TEXT NOT NULL,
    display TEXT NOT NULL,
    blocked_until TEXT,
    auth_failures INTEGER NOT NULL DEFAULT 0,
    throttles INTEGER NOT NULL DEFAULT 0,
    last_success_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_stats (
    credential_id INTEGER NOT NULL REFERENCES credentials(id) ON DELETE CASCADE,
    day TEXT NOT NULL,
    call_count INTEGER NOT NULL DEFAULT 0,
    throttle_count INTEGER NOT NULL DEFAULT 0,
    last_subnet TEXT,
    PRIMARY KEY (credential_id, day)
);

CREATE INDEX IF NOT EXISTS idx_daily_stats_day ON daily_stats(day);
"#;

/// SQLite-based key store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    vault: Vault,
    listeners: RwLock<Vec<Weak<dyn StoreListener>>>,
}

impl SqliteStore {
    /// Create a new SQLite store at `path`, sealing credential material
    /// with `vault`.
    pub async fn new(path: impl AsRef<Path>, vault: Vault) -> StoreResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Internal(format!("creating {}: {e}", parent.display())))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes all writes, which is what gives
            // the per-credential state machine its serial ordering.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            vault,
            listeners: RwLock::new(Vec::new()),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn notify(&self, event: StoreEvent<'_>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                listener.on_store_event(&event);
                true
            }
            None => false,
        });
    }

    /// Decrypt a row's material in place and verify it still hashes to the
    /// stored fingerprint.
    fn open_row(&self, mut row: CredentialRow) -> StoreResult<CredentialRow> {
        let plaintext = self.vault.decrypt(&row.material)?;
        if keypool_core::fingerprint(&plaintext) != row.fingerprint {
            return Err(StoreError::Corrupt(format!(
                "credential {} material does not match its fingerprint",
                row.display
            )));
        }
        row.material = plaintext;
        Ok(row)
    }

    async fn fetch_open(&self, id: i64) -> StoreResult<CredentialRow> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("credential id {id}")))?;
        self.open_row(row)
    }

    async fn fetch_stat(&self, credential_id: i64, day: &str) -> StoreResult<DailyStatRow> {
        let row = sqlx::query_as::<_, DailyStatRow>(
            "SELECT * FROM daily_stats WHERE credential_id = ? AND day = ?",
        )
        .bind(credential_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::Internal(format!("stat row for credential {credential_id} vanished"))
        })?;
        Ok(row)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint"))
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn register_listener(&self, listener: Weak<dyn StoreListener>) {
        self.listeners.write().push(listener);
    }
}

#[async_trait]
impl CredentialRepo for SqliteStore {
    async fn create(&self, material: &str) -> StoreResult<CredentialRow> {
        let fingerprint = keypool_core::fingerprint(material);
        let display = keypool_core::display_form(material);
        let sealed = self.vault.encrypt(material)?;
        let now = OffsetDateTime::now_utc();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO credentials (fingerprint, material, display, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&fingerprint)
        .bind(&sealed)
        .bind(&display)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(display.clone())
            } else {
                e.into()
            }
        })?;

        let row = CredentialRow {
            id,
            fingerprint,
            material: material.to_string(),
            display,
            blocked_until: None,
            auth_failures: 0,
            throttles: 0,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        };
        self.notify(StoreEvent::CredentialCreated(&row));
        Ok(row)
    }

    async fn create_if_below_cap(
        &self,
        material: &str,
        cap: u64,
    ) -> StoreResult<Option<CredentialRow>> {
        let fingerprint = keypool_core::fingerprint(material);
        let display = keypool_core::display_form(material);
        let sealed = self.vault.encrypt(material)?;
        let now = OffsetDateTime::now_utc();

        // Capacity check fused with the insert: concurrent enrollments race
        // on the same write connection and only one can take the last slot.
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO credentials (fingerprint, material, display, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?
            WHERE (SELECT COUNT(*) FROM credentials) < ?
            RETURNING id
            "#,
        )
        .bind(&fingerprint)
        .bind(&sealed)
        .bind(&display)
        .bind(now)
        .bind(now)
        .bind(cap as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(display.clone())
            } else {
                e.into()
            }
        })?;

        let Some(id) = id else {
            return Ok(None);
        };

        let row = CredentialRow {
            id,
            fingerprint,
            material: material.to_string(),
            display,
            blocked_until: None,
            auth_failures: 0,
            throttles: 0,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        };
        self.notify(StoreEvent::CredentialCreated(&row));
        Ok(Some(row))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<CredentialRow>> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| self.open_row(r)).transpose()
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> StoreResult<Option<CredentialRow>> {
        let row =
            sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| self.open_row(r)).transpose()
    }

    async fn find_available(&self, now: OffsetDateTime) -> StoreResult<Vec<CredentialRow>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE blocked_until IS NULL OR blocked_until <= ? ORDER BY id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| self.open_row(r)).collect()
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn set_block_deadline(
        &self,
        id: i64,
        deadline: Option<OffsetDateTime>,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE credentials SET blocked_until = ?, updated_at = ? WHERE id = ?")
                .bind(deadline)
                .bind(OffsetDateTime::now_utc())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("credential id {id}")));
        }

        match deadline {
            Some(blocked_until) => {
                self.notify(StoreEvent::CredentialBlocked { id, blocked_until });
            }
            None => {
                let row = self.fetch_open(id).await?;
                self.notify(StoreEvent::CredentialUnblocked(&row));
            }
        }
        Ok(())
    }

    async fn increment_auth_failures(&self, id: i64) -> StoreResult<i64> {
        let counters: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE credentials SET auth_failures = auth_failures + 1, updated_at = ?
            WHERE id = ?
            RETURNING auth_failures, throttles
            "#,
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let (auth_failures, throttles) =
            counters.ok_or_else(|| StoreError::NotFound(format!("credential id {id}")))?;
        self.notify(StoreEvent::CountersChanged {
            id,
            auth_failures,
            throttles,
        });
        Ok(auth_failures)
    }

    async fn increment_throttles(&self, id: i64) -> StoreResult<i64> {
        let counters: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE credentials SET throttles = throttles + 1, updated_at = ?
            WHERE id = ?
            RETURNING auth_failures, throttles
            "#,
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let (auth_failures, throttles) =
            counters.ok_or_else(|| StoreError::NotFound(format!("credential id {id}")))?;
        self.notify(StoreEvent::CountersChanged {
            id,
            auth_failures,
            throttles,
        });
        Ok(throttles)
    }

    async fn reset_counters(&self, id: i64) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET auth_failures = 0, throttles = 0, blocked_until = NULL,
                last_success_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("credential id {id}")));
        }

        let row = self.fetch_open(id).await?;
        self.notify(StoreEvent::CredentialReset(&row));
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("credential id {id}")));
        }
        self.notify(StoreEvent::CredentialDeleted { id });
        Ok(())
    }

    async fn delete_by_fingerprint(&self, fingerprint: &str) -> StoreResult<()> {
        let id: Option<i64> =
            sqlx::query_scalar("DELETE FROM credentials WHERE fingerprint = ? RETURNING id")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        let id = id.ok_or_else(|| StoreError::NotFound(format!("fingerprint {fingerprint}")))?;
        self.notify(StoreEvent::CredentialDeleted { id });
        Ok(())
    }
}

#[async_trait]
impl StatsRepo for SqliteStore {
    async fn get_today(&self, credential_id: i64) -> StoreResult<Option<DailyStatRow>> {
        self.get_for_day(credential_id, &today_utc()).await
    }

    async fn get_all_for_today(&self) -> StoreResult<Vec<DailyStatRow>> {
        let rows = sqlx::query_as::<_, DailyStatRow>("SELECT * FROM daily_stats WHERE day = ?")
            .bind(today_utc())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_for_day(
        &self,
        credential_id: i64,
        day: &str,
    ) -> StoreResult<Option<DailyStatRow>> {
        let row = sqlx::query_as::<_, DailyStatRow>(
            "SELECT * FROM daily_stats WHERE credential_id = ? AND day = ?",
        )
        .bind(credential_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn increment_call_count(&self, credential_id: i64, subnet: &str) -> StoreResult<()> {
        let day = today_utc();
        sqlx::query(
            r#"
            INSERT INTO daily_stats (credential_id, day, call_count, throttle_count, last_subnet)
            VALUES (?, ?, 1, 0, ?)
            ON CONFLICT(credential_id, day)
            DO UPDATE SET call_count = call_count + 1, last_subnet = excluded.last_subnet
            "#,
        )
        .bind(credential_id)
        .bind(&day)
        .bind(subnet)
        .execute(&self.pool)
        .await?;

        let stat = self.fetch_stat(credential_id, &day).await?;
        self.notify(StoreEvent::CallRecorded(&stat));
        Ok(())
    }

    async fn increment_throttle_count(&self, credential_id: i64) -> StoreResult<()> {
        let day = today_utc();
        sqlx::query(
            r#"
            INSERT INTO daily_stats (credential_id, day, call_count, throttle_count, last_subnet)
            VALUES (?, ?, 0, 1, NULL)
            ON CONFLICT(credential_id, day)
            DO UPDATE SET throttle_count = throttle_count + 1
            "#,
        )
        .bind(credential_id)
        .bind(&day)
        .execute(&self.pool)
        .await?;

        let stat = self.fetch_stat(credential_id, &day).await?;
        self.notify(StoreEvent::ThrottleRecorded(&stat));
        Ok(())
    }

    async fn delete_older_than(&self, days: u32) -> StoreResult<u64> {
        let cutoff = civil_day(
            OffsetDateTime::now_utc()
                .date()
                .saturating_sub(time::Duration::days(i64::from(days))),
        );
        let result = sqlx::query("DELETE FROM daily_stats WHERE day < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypool_vault::EncryptionKey;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    async fn build_store() -> (TempDir, SqliteStore) {
        let temp = tempfile::tempdir().unwrap();
        let vault = Vault::new(&EncryptionKey::generate());
        let store = SqliteStore::new(temp.path().join("keypool.db"), vault)
            .await
            .unwrap();
        (temp, store)
    }

    fn material(n: u32) -> String {
        format!("sk-test-{n:04}-abcdefghijklmnop")
    }

    #[tokio::test]
    async fn create_and_find_round_trips_material() {
        let (_temp, store) = build_store().await;
        let created = store.create(&material(1)).await.unwrap();
        assert_eq!(created.material, material(1));
        assert_eq!(created.auth_failures, 0);
        assert!(created.blocked_until.is_none());

        let found = store
            .find_by_fingerprint(&keypool_core::fingerprint(&material(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.material, material(1));

        // Material is not stored in clear.
        let raw: String = sqlx::query_scalar("SELECT material FROM credentials WHERE id = ?")
            .bind(created.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_ne!(raw, material(1));
        assert_eq!(raw.split(':').count(), 3);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_rejected() {
        let (_temp, store) = build_store().await;
        store.create(&material(1)).await.unwrap();
        assert!(matches!(
            store.create(&material(1)).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn find_available_excludes_future_deadlines_only() {
        let (_temp, store) = build_store().await;
        let now = OffsetDateTime::now_utc();
        let blocked = store.create(&material(1)).await.unwrap();
        let expired = store.create(&material(2)).await.unwrap();
        let open = store.create(&material(3)).await.unwrap();

        store
            .set_block_deadline(blocked.id, Some(now + time::Duration::minutes(10)))
            .await
            .unwrap();
        store
            .set_block_deadline(expired.id, Some(now - time::Duration::minutes(10)))
            .await
            .unwrap();

        let available = store.find_available(now).await.unwrap();
        let ids: Vec<i64> = available.iter().map(|r| r.id).collect();
        assert!(ids.contains(&expired.id));
        assert!(ids.contains(&open.id));
        assert!(!ids.contains(&blocked.id));
    }

    #[tokio::test]
    async fn counters_increment_and_reset() {
        let (_temp, store) = build_store().await;
        let row = store.create(&material(1)).await.unwrap();

        assert_eq!(store.increment_auth_failures(row.id).await.unwrap(), 1);
        assert_eq!(store.increment_auth_failures(row.id).await.unwrap(), 2);
        assert_eq!(store.increment_throttles(row.id).await.unwrap(), 1);

        store
            .set_block_deadline(row.id, Some(OffsetDateTime::now_utc() + time::Duration::hours(1)))
            .await
            .unwrap();

        store.reset_counters(row.id).await.unwrap();
        let fresh = store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(fresh.auth_failures, 0);
        assert_eq!(fresh.throttles, 0);
        assert!(fresh.blocked_until.is_none());
        assert!(fresh.last_success_at.is_some());
    }

    #[tokio::test]
    async fn cap_gate_is_atomic_with_insert() {
        let (_temp, store) = build_store().await;
        store.create(&material(1)).await.unwrap();
        store.create(&material(2)).await.unwrap();

        assert!(store
            .create_if_below_cap(&material(3), 3)
            .await
            .unwrap()
            .is_some());
        // Pool is at cap now.
        assert!(store
            .create_if_below_cap(&material(4), 3)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn concurrent_enrollment_respects_cap() {
        let (_temp, store) = build_store().await;
        let store = Arc::new(store);
        store.create(&material(1)).await.unwrap();

        let mut handles = Vec::new();
        for n in 10..18 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_if_below_cap(&material(n), 4).await
            }));
        }
        let mut enrolled = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                enrolled += 1;
            }
        }
        assert_eq!(enrolled, 3);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn delete_cascades_to_stats() {
        let (_temp, store) = build_store().await;
        let row = store.create(&material(1)).await.unwrap();
        store
            .increment_call_count(row.id, "10.0.0.0/24")
            .await
            .unwrap();
        assert!(store.get_today(row.id).await.unwrap().is_some());

        store.delete(row.id).await.unwrap();
        assert!(store.find_by_id(row.id).await.unwrap().is_none());
        assert!(store.get_today(row.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_upsert_counts_and_subnet() {
        let (_temp, store) = build_store().await;
        let row = store.create(&material(1)).await.unwrap();

        for _ in 0..3 {
            store
                .increment_call_count(row.id, "192.168.1.0/24")
                .await
                .unwrap();
        }
        store.increment_throttle_count(row.id).await.unwrap();
        store
            .increment_call_count(row.id, "10.1.2.0/24")
            .await
            .unwrap();

        let stat = store.get_today(row.id).await.unwrap().unwrap();
        assert_eq!(stat.call_count, 4);
        assert_eq!(stat.throttle_count, 1);
        assert_eq!(stat.last_subnet.as_deref(), Some("10.1.2.0/24"));
    }

    #[tokio::test]
    async fn concurrent_call_increments_do_not_lose_updates() {
        let (_temp, store) = build_store().await;
        let store = Arc::new(store);
        let row = store.create(&material(1)).await.unwrap();

        let before = store
            .get_today(row.id)
            .await
            .unwrap()
            .map(|s| s.call_count)
            .unwrap_or(0);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = row.id;
            handles.push(tokio::spawn(async move {
                store.increment_call_count(id, "10.0.0.0/24").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let after = store.get_today(row.id).await.unwrap().unwrap();
        assert_eq!(after.call_count, before + 20);
    }

    #[tokio::test]
    async fn retention_deletes_only_old_rows() {
        let (_temp, store) = build_store().await;
        let row = store.create(&material(1)).await.unwrap();
        store.increment_call_count(row.id, "10.0.0.0/24").await.unwrap();

        // Plant an old row directly.
        sqlx::query(
            "INSERT INTO daily_stats (credential_id, day, call_count, throttle_count) VALUES (?, '2001-01-01', 5, 0)",
        )
        .bind(row.id)
        .execute(store.pool())
        .await
        .unwrap();

        let removed = store.delete_older_than(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_today(row.id).await.unwrap().is_some());
        assert!(store
            .get_for_day(row.id, "2001-01-01")
            .await
            .unwrap()
            .is_none());
    }

    struct Recorder(Mutex<Vec<String>>);

    impl StoreListener for Recorder {
        fn on_store_event(&self, event: &StoreEvent<'_>) {
            let label = match event {
                StoreEvent::CredentialCreated(_) => "created",
                StoreEvent::CredentialReset(_) => "reset",
                StoreEvent::CredentialUnblocked(_) => "unblocked",
                StoreEvent::CredentialBlocked { .. } => "blocked",
                StoreEvent::CountersChanged { .. } => "counters",
                StoreEvent::CredentialDeleted { .. } => "deleted",
                StoreEvent::CallRecorded(_) => "call",
                StoreEvent::ThrottleRecorded(_) => "throttle",
            };
            self.0.lock().unwrap().push(label.to_string());
        }
    }

    #[tokio::test]
    async fn mutations_notify_listeners_in_order() {
        let (_temp, store) = build_store().await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let listener: Weak<dyn StoreListener> =
            Arc::downgrade(&(recorder.clone() as Arc<dyn StoreListener>));
        store.register_listener(listener);

        let row = store.create(&material(1)).await.unwrap();
        store.increment_auth_failures(row.id).await.unwrap();
        store
            .set_block_deadline(row.id, Some(OffsetDateTime::now_utc() + time::Duration::hours(1)))
            .await
            .unwrap();
        store.reset_counters(row.id).await.unwrap();
        store.delete(row.id).await.unwrap();

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["created", "counters", "blocked", "reset", "deleted"]
        );
    }

    #[tokio::test]
    async fn dropped_listeners_are_pruned() {
        let (_temp, store) = build_store().await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let listener: Weak<dyn StoreListener> =
            Arc::downgrade(&(recorder.clone() as Arc<dyn StoreListener>));
        store.register_listener(listener);
        drop(recorder);

        // Must not panic or deliver to the dead listener.
        store.create(&material(1)).await.unwrap();
    }
}
