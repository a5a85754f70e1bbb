//! Per-presenter admission gate.
//!
//! A bounded LRU from presented-credential fingerprint to the time of the
//! last admission. A presenter seen less than the configured interval ago is
//! denied with a wait hint; a full map evicts its oldest entry rather than
//! denying. Two racing first requests from one presenter may both pass:
//! this is a coarse throttle, not an exact one.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Presenter rate-limit gate.
pub struct PresenterGate {
    entries: Mutex<LruCache<String, Instant>>,
    interval: Duration,
    /// Entries older than this are dropped opportunistically.
    ttl: Duration,
}

impl PresenterGate {
    /// Create a gate admitting each presenter at most once per `interval`,
    /// tracking at most `capacity` presenters. The TTL is twice the
    /// interval.
    pub fn new(interval: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            interval,
            ttl: interval * 2,
        }
    }

    /// Admit or deny a presenter. Denials carry the whole seconds to wait.
    pub fn check(&self, fingerprint: &str) -> Result<(), u64> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();

        // Opportunistic TTL sweep from the cold end.
        while let Some((_, last)) = entries.peek_lru() {
            if now.duration_since(*last) > self.ttl {
                entries.pop_lru();
            } else {
                break;
            }
        }

        if let Some(last) = entries.get(fingerprint) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                return Err(wait.as_secs() + 1);
            }
        }

        entries.put(fingerprint.to_string(), now);
        Ok(())
    }

    /// Number of tracked presenters.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admission_passes_second_is_denied() {
        let gate = PresenterGate::new(Duration::from_secs(1), 10);
        assert!(gate.check("fp-a").is_ok());
        let wait = gate.check("fp-a").unwrap_err();
        assert!(wait >= 1);
    }

    #[test]
    fn distinct_presenters_do_not_interfere() {
        let gate = PresenterGate::new(Duration::from_secs(1), 10);
        assert!(gate.check("fp-a").is_ok());
        assert!(gate.check("fp-b").is_ok());
    }

    #[test]
    fn admission_after_interval_elapses() {
        let gate = PresenterGate::new(Duration::from_millis(20), 10);
        assert!(gate.check("fp-a").is_ok());
        assert!(gate.check("fp-a").is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(gate.check("fp-a").is_ok());
    }

    #[test]
    fn full_gate_evicts_oldest_instead_of_denying() {
        let gate = PresenterGate::new(Duration::from_secs(60), 2);
        assert!(gate.check("fp-a").is_ok());
        assert!(gate.check("fp-b").is_ok());
        // A third presenter is admitted; fp-a falls out.
        assert!(gate.check("fp-c").is_ok());
        assert_eq!(gate.len(), 2);
        // fp-a was evicted, so it is admitted again despite the window.
        assert!(gate.check("fp-a").is_ok());
    }

    #[test]
    fn stale_entries_are_swept() {
        let gate = PresenterGate::new(Duration::from_millis(10), 10);
        assert!(gate.check("fp-a").is_ok());
        std::thread::sleep(Duration::from_millis(30));
        // TTL (2x interval) has passed; the sweep drops the entry.
        assert!(gate.check("fp-b").is_ok());
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn zero_interval_disables_the_gate() {
        let gate = PresenterGate::new(Duration::ZERO, 10);
        assert!(gate.check("fp-a").is_ok());
        assert!(gate.check("fp-a").is_ok());
    }
}
