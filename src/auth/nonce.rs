//! In-memory nonce ledger for replay attack prevention.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::clock::Clock;

/// Default nonce time-to-live (15 minutes).
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(15 * 60);

/// Run a full sweep after this many reservations, independent of the
/// background task.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NonceKey {
    principal: String,
    nonce: String,
}

impl NonceKey {
    fn new(principal: &str, nonce: &str) -> Self {
        Self {
            principal: principal.to_string(),
            nonce: nonce.to_string(),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    /// Map of (principal, nonce) -> expiry in epoch milliseconds.
    entries: HashMap<NonceKey, u64>,
    reservations_since_sweep: u64,
}

impl LedgerState {
    fn evict_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now_ms);
        self.reservations_since_sweep = 0;
        before - self.entries.len()
    }
}

/// Thread-safe TTL-indexed record of consumed nonces.
///
/// The only way to mark a nonce consumed is [`NonceLedger::reserve`], a single
/// check-and-set under the ledger mutex. A nonce is live while its expiry is
/// strictly after the current time; expired entries are dropped lazily on
/// lookup, periodically during reservations, and by the background sweep.
pub struct NonceLedger {
    state: Mutex<LedgerState>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl NonceLedger {
    /// Create a new ledger with the given default TTL.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            ttl,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(), // Recover from mutex poisoning
        }
    }

    /// The default TTL applied by [`NonceLedger::reserve_default`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The clock this ledger reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Record `nonce` as consumed for `principal` if it is not already live.
    ///
    /// Returns `true` if the nonce was new (or its previous use had expired),
    /// `false` if it is still live. A `false` result mutates nothing.
    pub fn reserve(&self, principal: &str, nonce: &str, ttl: Duration) -> bool {
        self.reserve_at(principal, nonce, ttl, self.clock.now_millis())
    }

    /// [`NonceLedger::reserve`] with the ledger's default TTL.
    pub fn reserve_default(&self, principal: &str, nonce: &str) -> bool {
        self.reserve(principal, nonce, self.ttl)
    }

    /// [`NonceLedger::reserve`] against an explicit clock reading.
    pub fn reserve_at(&self, principal: &str, nonce: &str, ttl: Duration, now_ms: u64) -> bool {
        let mut state = self.lock();

        state.reservations_since_sweep += 1;
        if state.reservations_since_sweep >= SWEEP_EVERY {
            let evicted = state.evict_expired(now_ms);
            if evicted > 0 {
                debug!(evicted, "Swept expired nonces during reservation");
            }
        }

        let key = NonceKey::new(principal, nonce);
        if let Some(&expiry) = state.entries.get(&key) {
            if expiry > now_ms {
                return false;
            }
        }

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expiry = now_ms.saturating_add(ttl_ms);
        state.entries.insert(key, expiry);
        true
    }

    /// Whether `nonce` is currently live for `principal`.
    pub fn is_live(&self, principal: &str, nonce: &str) -> bool {
        let now_ms = self.clock.now_millis();
        self.lock()
            .entries
            .get(&NonceKey::new(principal, nonce))
            .is_some_and(|&expiry| expiry > now_ms)
    }

    /// Remove entries whose expiry is at or before `now_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_expired(&self, now_ms: u64) -> usize {
        self.lock().evict_expired(now_ms)
    }

    /// Remove expired entries as of the ledger clock.
    pub fn sweep(&self) -> usize {
        self.evict_expired(self.clock.now_millis())
    }

    /// Number of stored entries, live or not yet swept (for monitoring).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a background sweep task.
    ///
    /// This spawns a tokio task that periodically evicts expired nonces.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                let evicted = ledger.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = ledger.len(), "Nonce sweep complete");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::{ManualClock, SystemClock};
    use std::sync::Barrier;
    use std::thread;

    const TTL: Duration = Duration::from_secs(60);

    fn manual_ledger(start: u64) -> (Arc<ManualClock>, NonceLedger) {
        let clock = Arc::new(ManualClock::new(start));
        let ledger = NonceLedger::new(TTL, clock.clone());
        (clock, ledger)
    }

    #[test]
    fn test_new_nonce_accepted() {
        let (_clock, ledger) = manual_ledger(0);
        assert!(ledger.reserve("u1", "nonce1", TTL));
        assert!(ledger.reserve("u1", "nonce2", TTL));
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let (_clock, ledger) = manual_ledger(0);
        assert!(ledger.reserve("u1", "nonce1", TTL));
        assert!(!ledger.reserve("u1", "nonce1", TTL));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_nonce_scoped_by_principal() {
        let (_clock, ledger) = manual_ledger(0);
        assert!(ledger.reserve("u1", "shared", TTL));
        assert!(ledger.reserve("u2", "shared", TTL));
        assert!(!ledger.reserve("u2", "shared", TTL));
    }

    #[test]
    fn test_rejected_reserve_does_not_extend_expiry() {
        let (clock, ledger) = manual_ledger(0);
        assert!(ledger.reserve("u1", "n", TTL));

        clock.advance(59_000);
        assert!(!ledger.reserve("u1", "n", TTL));

        // Still expires at the original deadline.
        clock.advance(1_000);
        assert!(!ledger.is_live("u1", "n"));
        assert!(ledger.reserve("u1", "n", TTL));
    }

    #[test]
    fn test_slot_reuse_after_expiry_and_eviction() {
        let (clock, ledger) = manual_ledger(1_000);
        assert!(ledger.reserve("u1", "abc", TTL));
        assert!(ledger.is_live("u1", "abc"));

        clock.advance(TTL.as_millis() as u64 + 1);
        assert_eq!(ledger.sweep(), 1);
        assert!(ledger.is_empty());
        assert!(ledger.reserve("u1", "abc", TTL));
    }

    #[test]
    fn test_evict_keeps_live_entries() {
        let (_clock, ledger) = manual_ledger(0);
        assert!(ledger.reserve_at("u1", "old", Duration::from_millis(10), 0));
        assert!(ledger.reserve_at("u1", "new", Duration::from_millis(100), 0));

        assert_eq!(ledger.evict_expired(10), 1);
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.reserve_at("u1", "new", TTL, 50));
    }

    #[test]
    fn test_oversized_ttl_saturates_instead_of_wrapping() {
        let (clock, ledger) = manual_ledger(1_000);
        // 2^64 + 1 ms would wrap to 1 ms if truncated.
        let huge = Duration::from_millis(u64::MAX) + Duration::from_millis(2);
        assert!(ledger.reserve("u1", "forever", huge));

        clock.advance(10);
        assert!(ledger.is_live("u1", "forever"));
        assert!(!ledger.reserve("u1", "forever", TTL));
        assert_eq!(ledger.sweep(), 0);
    }

    #[test]
    fn test_periodic_sweep_bounds_memory() {
        let (clock, ledger) = manual_ledger(0);
        for i in 0..SWEEP_EVERY - 1 {
            assert!(ledger.reserve("u1", &format!("n{i}"), Duration::from_millis(5)));
        }
        clock.advance(10);
        assert!(ledger.reserve("u1", "trigger", TTL));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_exactly_one_winner_under_contention() {
        let ledger = Arc::new(NonceLedger::new(TTL, Arc::new(SystemClock)));
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger.reserve_default("u1", "racy")
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_background_sweep_task() {
        let clock = Arc::new(ManualClock::new(0));
        let ledger = Arc::new(NonceLedger::new(TTL, clock.clone()));
        assert!(ledger.reserve_default("u1", "n"));

        clock.advance(TTL.as_millis() as u64);
        let handle = ledger.start_sweep_task(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(ledger.is_empty());
    }
}
