//! Power-of-two-choices credential selection.
//!
//! The balancer is stateless apart from an advancing cursor. Randomness
//! comes from the hot cache's shuffled order; the cursor layers round-robin
//! candidate choice on top of it, advancing by two positions per call.

use keypool_metadata::{CredentialRow, DailyStatRow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stateless selector over a snapshot of available credentials.
#[derive(Default)]
pub struct Balancer {
    cursor: AtomicUsize,
}

impl Balancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the credential to forward with, or `None` when the sequence is
    /// empty.
    ///
    /// Two candidates are drawn from the cursor; fewer throttles wins, then
    /// fewer calls, then the first candidate. The presenter's own key only
    /// displaces the running winner with strictly better stats, which keeps
    /// heavy local callers spread across the pool.
    pub fn select<'a>(
        &self,
        available: &'a [CredentialRow],
        stats: &HashMap<i64, DailyStatRow>,
        presenter_fingerprint: &str,
    ) -> Option<&'a CredentialRow> {
        match available.len() {
            0 => None,
            1 => Some(&available[0]),
            len => {
                let base = self.cursor.fetch_add(2, Ordering::Relaxed);
                let first = &available[base % len];
                let second = &available[(base + 1) % len];

                let mut winner = if beats(load(stats, second.id), load(stats, first.id)) {
                    second
                } else {
                    first
                };

                if let Some(own) = available
                    .iter()
                    .find(|c| c.fingerprint == presenter_fingerprint)
                {
                    if beats(load(stats, own.id), load(stats, winner.id)) {
                        winner = own;
                    }
                }

                Some(winner)
            }
        }
    }
}

/// (throttles, calls) for a credential, defaulting missing entries to zero.
fn load(stats: &HashMap<i64, DailyStatRow>, id: i64) -> (i64, i64) {
    stats
        .get(&id)
        .map(|s| (s.throttle_count, s.call_count))
        .unwrap_or((0, 0))
}

/// Strictly-better comparison: fewer throttles, then fewer calls.
fn beats(challenger: (i64, i64), incumbent: (i64, i64)) -> bool {
    challenger.0 < incumbent.0 || (challenger.0 == incumbent.0 && challenger.1 < incumbent.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn credential(id: i64) -> CredentialRow {
        let now = OffsetDateTime::now_utc();
        CredentialRow {
            id,
            fingerprint: format!("fp-{id}"),
            material: format!("sk-material-{id:04}-xxxx"),
            display: format!("sk-m..{id:04}"),
            blocked_until: None,
            auth_failures: 0,
            throttles: 0,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn stat(id: i64, calls: i64, throttles: i64) -> DailyStatRow {
        DailyStatRow {
            credential_id: id,
            day: keypool_metadata::today_utc(),
            call_count: calls,
            throttle_count: throttles,
            last_subnet: None,
        }
    }

    fn stats(entries: &[(i64, i64, i64)]) -> HashMap<i64, DailyStatRow> {
        entries
            .iter()
            .map(|&(id, calls, throttles)| (id, stat(id, calls, throttles)))
            .collect()
    }

    #[test]
    fn empty_sequence_selects_nothing() {
        let balancer = Balancer::new();
        assert!(balancer.select(&[], &HashMap::new(), "fp-0").is_none());
    }

    #[test]
    fn singleton_is_returned_unconditionally() {
        let balancer = Balancer::new();
        let pool = vec![credential(1)];
        // Even a heavily throttled singleton is the only choice.
        let stats = stats(&[(1, 100, 100)]);
        assert_eq!(balancer.select(&pool, &stats, "fp-0").unwrap().id, 1);
    }

    #[test]
    fn fewer_throttles_wins_between_candidates() {
        let balancer = Balancer::new();
        let pool = vec![credential(1), credential(2)];
        // Candidates are positions 0 and 1 on the first call.
        let stats = stats(&[(1, 0, 5), (2, 10, 1)]);
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 2);
    }

    #[test]
    fn calls_break_throttle_ties() {
        let balancer = Balancer::new();
        let pool = vec![credential(1), credential(2)];
        let stats = stats(&[(1, 9, 2), (2, 4, 2)]);
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 2);
    }

    #[test]
    fn first_candidate_wins_full_ties() {
        let balancer = Balancer::new();
        let pool = vec![credential(1), credential(2)];
        let stats = stats(&[(1, 3, 1), (2, 3, 1)]);
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 1);
    }

    #[test]
    fn missing_stats_default_to_zero() {
        let balancer = Balancer::new();
        let pool = vec![credential(1), credential(2)];
        let stats = stats(&[(1, 3, 0)]);
        // Credential 2 has no stats row: zero calls beats three.
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 2);
    }

    #[test]
    fn cursor_advances_two_per_call() {
        let balancer = Balancer::new();
        let pool: Vec<CredentialRow> = (1..=4).map(credential).collect();
        let stats = HashMap::new();

        // All stats tie, so the first candidate wins: positions 0, 2, 0, ...
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 1);
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 3);
        assert_eq!(balancer.select(&pool, &stats, "unknown").unwrap().id, 1);
    }

    #[test]
    fn presenter_displaces_only_with_strictly_better_stats() {
        let balancer = Balancer::new();
        let pool = vec![credential(1), credential(2), credential(3)];

        // Presenter (id 3) ties the winner: stays displaced.
        let tied = stats(&[(1, 2, 0), (2, 5, 0), (3, 2, 0)]);
        assert_eq!(balancer.select(&pool, &tied, "fp-3").unwrap().id, 1);

        // Presenter strictly better: takes over.
        let better = stats(&[(1, 2, 0), (2, 5, 0), (3, 1, 0)]);
        assert_eq!(balancer.select(&pool, &better, "fp-3").unwrap().id, 3);
    }

    #[test]
    fn unknown_presenter_is_ignored() {
        let balancer = Balancer::new();
        let pool = vec![credential(1), credential(2)];
        let stats = HashMap::new();
        assert_eq!(
            balancer.select(&pool, &stats, "fp-of-someone-else").unwrap().id,
            1
        );
    }
}
