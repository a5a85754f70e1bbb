//! Credential lifecycle management.
//!
//! Applies upstream response codes to per-credential state: counter resets
//! on success, blocking and exponential backoff on auth failures and
//! throttles, deletion past the configured thresholds, and auto-enrollment
//! of previously unseen credentials. Also owns the presenter admission
//! gate.

use crate::ratelimit::PresenterGate;
use keypool_core::config::BlockingConfig;
use keypool_metadata::{CredentialRepo, CredentialRow, KeyStore, StatsRepo, StoreError, StoreResult};
use std::net::Ipv4Addr;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// The credential a request leaves with.
#[derive(Clone, Debug)]
pub enum SelectedKey {
    /// A persisted pool credential.
    Resident(CredentialRow),
    /// A presented credential not (yet) in the pool.
    Transient {
        material: String,
        fingerprint: String,
        display: String,
    },
}

impl SelectedKey {
    /// Wrap presented material that has no pool record.
    pub fn transient(material: String) -> Self {
        let fingerprint = keypool_core::fingerprint(&material);
        let display = keypool_core::display_form(&material);
        Self::Transient {
            material,
            fingerprint,
            display,
        }
    }

    /// Raw credential material to forward with.
    pub fn material(&self) -> &str {
        match self {
            Self::Resident(row) => &row.material,
            Self::Transient { material, .. } => material,
        }
    }

    /// Log-safe abbreviation.
    pub fn display(&self) -> &str {
        match self {
            Self::Resident(row) => &row.display,
            Self::Transient { display, .. } => display,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Resident(_))
    }
}

/// What the state machine did with a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Counters reset or credential enrolled.
    Success,
    /// A block deadline was written.
    Blocked,
    /// The credential crossed a delete threshold.
    Deleted,
    /// Served without touching credential state.
    Proxied,
}

/// Outcome of `handle_response`, for logging.
#[derive(Clone, Debug)]
pub struct ResponseOutcome {
    pub action: LifecycleAction,
    pub message: String,
}

impl ResponseOutcome {
    fn new(action: LifecycleAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
        }
    }
}

/// Applies the lifecycle state machine and the presenter admission gate.
pub struct LifecycleManager {
    store: Arc<dyn KeyStore>,
    blocking: BlockingConfig,
    max_keys: u64,
    gate: PresenterGate,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn KeyStore>, blocking: BlockingConfig, max_keys: u64) -> Self {
        let gate = PresenterGate::new(blocking.presenter_interval(), max_keys as usize);
        Self {
            store,
            blocking,
            max_keys,
            gate,
        }
    }

    /// Admit or deny a presenter; denials carry seconds to wait.
    pub fn check_presenter_rate_limit(&self, fingerprint: &str) -> Result<(), u64> {
        self.gate.check(fingerprint)
    }

    /// Feed an upstream status code back into credential state.
    pub async fn handle_response(
        &self,
        selected: &SelectedKey,
        status: u16,
    ) -> StoreResult<ResponseOutcome> {
        match selected {
            SelectedKey::Resident(row) => self.handle_resident(row, status).await,
            SelectedKey::Transient { material, .. } => {
                self.handle_transient(material, status).await
            }
        }
    }

    async fn handle_resident(
        &self,
        row: &CredentialRow,
        status: u16,
    ) -> StoreResult<ResponseOutcome> {
        match status {
            200..=299 => {
                self.store.reset_counters(row.id).await?;
                Ok(ResponseOutcome::new(
                    LifecycleAction::Success,
                    format!("{} healthy, counters reset", row.display),
                ))
            }
            401 => {
                let failures = self.store.increment_auth_failures(row.id).await?;
                if failures >= i64::from(self.blocking.auth_failure_delete_threshold) {
                    self.store.delete(row.id).await?;
                    return Ok(ResponseOutcome::new(
                        LifecycleAction::Deleted,
                        format!("{} deleted after {failures} consecutive auth failures", row.display),
                    ));
                }
                let deadline = OffsetDateTime::now_utc()
                    + Duration::minutes(self.blocking.auth_failure_block_minutes as i64);
                self.store.set_block_deadline(row.id, Some(deadline)).await?;
                Ok(ResponseOutcome::new(
                    LifecycleAction::Blocked,
                    format!(
                        "{} blocked for {} minutes (auth failure {failures})",
                        row.display, self.blocking.auth_failure_block_minutes
                    ),
                ))
            }
            429 => {
                let throttles = self.store.increment_throttles(row.id).await?;
                self.store.increment_throttle_count(row.id).await?;
                if throttles >= i64::from(self.blocking.throttle_delete_threshold) {
                    self.store.delete(row.id).await?;
                    return Ok(ResponseOutcome::new(
                        LifecycleAction::Deleted,
                        format!("{} deleted after {throttles} consecutive throttles", row.display),
                    ));
                }
                let minutes = self.backoff_minutes(throttles);
                let deadline = OffsetDateTime::now_utc() + Duration::minutes(minutes);
                self.store.set_block_deadline(row.id, Some(deadline)).await?;
                Ok(ResponseOutcome::new(
                    LifecycleAction::Blocked,
                    format!(
                        "{} backing off {minutes} minutes (throttle {throttles})",
                        row.display
                    ),
                ))
            }
            _ => Ok(ResponseOutcome::new(
                LifecycleAction::Proxied,
                format!("{} unchanged on status {status}", row.display),
            )),
        }
    }

    async fn handle_transient(&self, material: &str, status: u16) -> StoreResult<ResponseOutcome> {
        if !(200..=299).contains(&status) {
            return Ok(ResponseOutcome::new(
                LifecycleAction::Proxied,
                format!("untracked credential, status {status}"),
            ));
        }

        match self.store.create_if_below_cap(material, self.max_keys).await {
            Ok(Some(row)) => Ok(ResponseOutcome::new(
                LifecycleAction::Success,
                format!("{} enrolled into the pool", row.display),
            )),
            Ok(None) => Ok(ResponseOutcome::new(
                LifecycleAction::Proxied,
                format!("proxied, not enrolled (pool at capacity {})", self.max_keys),
            )),
            // A concurrent request enrolled the same material first.
            Err(StoreError::Duplicate(display)) => Ok(ResponseOutcome::new(
                LifecycleAction::Success,
                format!("{display} already enrolled"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Backoff for the n-th consecutive throttle: 2^(n-1) times the base.
    fn backoff_minutes(&self, throttles: i64) -> i64 {
        let exponent = (throttles - 1).clamp(0, 30) as u32;
        (self.blocking.throttle_backoff_base_minutes as i64).saturating_mul(1 << exponent)
    }
}

/// Privacy-limited client attribution: IPv4 collapses to its /24, anything
/// else passes through unchanged.
pub fn subnet(ip: &str) -> String {
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) => {
            let octets = addr.octets();
            format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
        }
        Err(_) => ip.to_string(),
    }
}
