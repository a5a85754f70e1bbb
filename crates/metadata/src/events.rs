//! Store mutation events.
//!
//! Every successful store mutation publishes an event to registered
//! listeners before the mutating call returns. The hot cache subscribes to
//! keep its snapshot consistent without owning the store (and without the
//! store owning the cache): listeners are held as weak references, so the
//! subscription creates no reference cycle.

use crate::models::{CredentialRow, DailyStatRow};
use time::OffsetDateTime;

/// A mutation that just happened in the store.
#[derive(Debug)]
pub enum StoreEvent<'a> {
    /// A credential was inserted (import or auto-enrollment).
    CredentialCreated(&'a CredentialRow),
    /// Counters were zeroed and the block deadline cleared after a success.
    CredentialReset(&'a CredentialRow),
    /// A block deadline was cleared without touching counters.
    CredentialUnblocked(&'a CredentialRow),
    /// A block deadline in the future was written.
    CredentialBlocked {
        id: i64,
        blocked_until: OffsetDateTime,
    },
    /// Consecutive counters moved without a change in availability.
    CountersChanged {
        id: i64,
        auth_failures: i64,
        throttles: i64,
    },
    /// The credential and its statistics are gone.
    CredentialDeleted { id: i64 },
    /// Today's call count advanced.
    CallRecorded(&'a DailyStatRow),
    /// Today's throttle count advanced.
    ThrottleRecorded(&'a DailyStatRow),
}

/// Receiver for store mutations. Implementations must be cheap and
/// non-blocking; they run inline on the mutating call.
pub trait StoreListener: Send + Sync {
    fn on_store_event(&self, event: &StoreEvent<'_>);
}
