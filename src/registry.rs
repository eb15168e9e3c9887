//! Correlation registry: the only state shared between the ingress listener
//! and the self-test.
//!
//! The ingress classifier [`record`][CorrelationRegistry::record]s every
//! health-check id it sees; the self-test claims its own id with
//! [`try_consume`][CorrelationRegistry::try_consume]. Presence means "observed
//! but not yet claimed". Absence covers both "never observed" and "already
//! claimed"; the two are indistinguishable because each id is used once.
//!
//! Waiters are woken through a [`Notify`] whenever anything is recorded, with
//! a fixed-interval recheck underneath, so a waiting self-test reacts to its
//! event immediately without relying on the poll cadence.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

/// Concurrent set of observed-but-unclaimed check ids.
///
/// Safe to share across tasks via `Arc<CorrelationRegistry>`. No lock is held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    /// id → when it was first observed (used by the TTL sweep).
    seen: DashMap<String, Instant>,
    recorded: Notify,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as observed.
    ///
    /// Idempotent: recording an id that is already pending keeps its original
    /// timestamp.
    pub fn record(&self, id: &str) {
        self.seen.entry(id.to_owned()).or_insert_with(Instant::now);
        self.recorded.notify_waiters();
    }

    /// Atomically remove `id`, returning whether it was pending.
    ///
    /// Of any number of concurrent callers for the same id, at most one sees
    /// `true`.
    pub fn try_consume(&self, id: &str) -> bool {
        self.seen.remove(id).is_some()
    }

    /// Whether `id` is pending, without claiming it.
    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains_key(id)
    }

    /// Number of pending ids.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Wait until `id` can be consumed or `timeout` elapses.
    ///
    /// Returns `true` if this call consumed the id. The registry is rechecked
    /// on every [`record`][Self::record] and at least every `poll_interval`;
    /// one final check is made once the deadline is reached.
    pub async fn wait_for(&self, id: &str, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a record() landing between
            // the check and the select! still wakes us.
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_consume(id) {
                return true;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }

            let nap = poll_interval.min(deadline - now);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Drop entries first observed more than `ttl` ago. Returns how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut dropped = 0;
        self.seen.retain(|id, seen_at| {
            let keep = seen_at.elapsed() < ttl;
            if !keep {
                debug!(%id, "dropping unclaimed health signal");
                dropped += 1;
            }
            keep
        });
        dropped
    }
}

/// Background task: sweeps stale entries every `every`.
///
/// Signals for checks that already timed out are never claimed; this keeps
/// them from accumulating.
pub async fn sweep_loop(registry: Arc<CorrelationRegistry>, ttl: Duration, every: Duration) {
    // Initial tick fires immediately; nothing can be stale yet.
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;
        if registry.is_empty() {
            continue;
        }
        let dropped = registry.sweep(ttl);
        if dropped > 0 {
            debug!(dropped, remaining = registry.len(), "registry sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    // -----------------------------------------------------------------------
    // record / try_consume
    // -----------------------------------------------------------------------

    #[test]
    fn consume_returns_true_then_false() {
        let registry = CorrelationRegistry::new();
        registry.record("abc");
        assert!(registry.try_consume("abc"));
        assert!(!registry.try_consume("abc"), "a claimed id must not be claimable again");
    }

    #[test]
    fn consume_of_unknown_id_is_a_no_op() {
        let registry = CorrelationRegistry::new();
        registry.record("other");
        assert!(!registry.try_consume("missing"));
        assert!(registry.contains("other"));
    }

    #[test]
    fn record_is_idempotent() {
        let registry = CorrelationRegistry::new();
        registry.record("dup");
        registry.record("dup");
        assert_eq!(registry.len(), 1);
        assert!(registry.try_consume("dup"));
        assert!(!registry.try_consume("dup"));
        assert!(registry.is_empty());
    }

    #[test]
    fn contains_does_not_consume() {
        let registry = CorrelationRegistry::new();
        registry.record("peek");
        assert!(registry.contains("peek"));
        assert!(registry.contains("peek"));
        assert!(registry.try_consume("peek"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_have_exactly_one_winner() {
        let registry = Arc::new(CorrelationRegistry::new());
        registry.record("contested");
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let winners = Arc::clone(&winners);
                tokio::spawn(async move {
                    if registry.try_consume("contested") {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // wait_for
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn wait_for_succeeds_immediately_when_already_recorded() {
        let registry = CorrelationRegistry::new();
        registry.record("early");
        assert!(registry.wait_for("early", Duration::from_millis(50), Duration::from_millis(10)).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_for_is_woken_by_record_before_the_poll_interval() {
        let registry = Arc::new(CorrelationRegistry::new());
        let writer = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.record("late");
        });

        let started = Instant::now();
        // Poll interval far longer than the test: only the notification can wake us in time.
        let found = registry
            .wait_for("late", Duration::from_secs(10), Duration::from_secs(10))
            .await;

        assert!(found);
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn wait_for_ignores_other_ids() {
        let registry = Arc::new(CorrelationRegistry::new());
        let writer = Arc::clone(&registry);
        tokio::spawn(async move {
            writer.record("someone-else");
        });

        let found = registry
            .wait_for("mine", Duration::from_millis(200), Duration::from_millis(20))
            .await;
        assert!(!found);
        assert!(registry.contains("someone-else"));
    }

    #[tokio::test]
    async fn wait_for_times_out_after_the_budget() {
        let registry = CorrelationRegistry::new();
        let started = Instant::now();
        let found = registry
            .wait_for("never", Duration::from_millis(300), Duration::from_millis(100))
            .await;
        let elapsed = started.elapsed();

        assert!(!found);
        assert!(elapsed >= Duration::from_millis(300), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "overshot: {elapsed:?}");
    }

    // -----------------------------------------------------------------------
    // sweep
    // -----------------------------------------------------------------------

    #[test]
    fn sweep_drops_entries_older_than_ttl() {
        let registry = CorrelationRegistry::new();
        registry.record("a");
        registry.record("b");
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(registry.sweep(Duration::from_millis(10)), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sweep_loop_drains_stale_entries_in_the_background() {
        let registry = Arc::new(CorrelationRegistry::new());
        registry.record("abandoned");

        let task = tokio::spawn(sweep_loop(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_millis(25),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert!(registry.is_empty(), "sweep loop never dropped the stale id");
    }

    #[tokio::test]
    async fn sweep_loop_does_not_drop_on_its_first_tick() {
        let registry = Arc::new(CorrelationRegistry::new());
        registry.record("young");

        let task = tokio::spawn(sweep_loop(
            Arc::clone(&registry),
            Duration::ZERO,
            Duration::from_secs(60),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();

        assert!(registry.contains("young"));
    }

    #[test]
    fn sweep_keeps_fresh_entries() {
        let registry = CorrelationRegistry::new();
        registry.record("fresh");
        assert_eq!(registry.sweep(Duration::from_secs(60)), 0);
        assert!(registry.contains("fresh"));
    }
}
