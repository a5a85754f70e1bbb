//! Database models mapping to the store schema.

use sqlx::FromRow;
use time::{Date, OffsetDateTime};

/// Pooled credential record.
///
/// At rest `material` holds the vault ciphertext; rows returned by the
/// store carry the decrypted plaintext (verified against `fingerprint`).
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub fingerprint: String,
    pub material: String,
    pub display: String,
    pub blocked_until: Option<OffsetDateTime>,
    pub auth_failures: i64,
    pub throttles: i64,
    pub last_success_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl CredentialRow {
    /// Whether this credential is blocked at the given instant. Deadlines
    /// are never auto-cleared, so reads must re-evaluate against `now`.
    pub fn is_blocked(&self, now: OffsetDateTime) -> bool {
        matches!(self.blocked_until, Some(until) if until > now)
    }
}

/// Per-credential per-day statistics record.
#[derive(Debug, Clone, FromRow)]
pub struct DailyStatRow {
    pub credential_id: i64,
    /// UTC civil date, `YYYY-MM-DD`.
    pub day: String,
    pub call_count: i64,
    pub throttle_count: i64,
    pub last_subnet: Option<String>,
}

/// Format a civil date the way the store keys statistics rows.
pub fn civil_day(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Today's UTC civil date.
pub fn today_utc() -> String {
    civil_day(OffsetDateTime::now_utc().date())
}
