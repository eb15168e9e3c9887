//! Process-lifetime counters, rendered by [`crate::api::metrics`].
//!
//! Plain atomics: every counter is monotonic and independent, so there is
//! nothing to keep consistent across them.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{error::CheckFailure, selftest::CheckOutcome};

#[derive(Debug, Default)]
pub struct Metrics {
    events_relayed: AtomicU64,
    health_signals_received: AtomicU64,
    forward_failures: AtomicU64,
    checks_passed: AtomicU64,
    checks_publish_failed: AtomicU64,
    checks_timed_out: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_relayed: u64,
    pub health_signals_received: u64,
    pub forward_failures: u64,
    pub checks_passed: u64,
    pub checks_publish_failed: u64,
    pub checks_timed_out: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A regular event is about to be relayed. Counted before the attempt.
    pub fn record_relayed(&self) {
        self.events_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_signal(&self) {
        self.health_signals_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_failure(&self) {
        self.forward_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_check(&self, outcome: &CheckOutcome) {
        let counter = match outcome {
            CheckOutcome::Passed { .. } => &self.checks_passed,
            CheckOutcome::Failed(CheckFailure::PublishFailed { .. }) => &self.checks_publish_failed,
            CheckOutcome::Failed(CheckFailure::ObservationTimeout { .. }) => &self.checks_timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_relayed: self.events_relayed.load(Ordering::Relaxed),
            health_signals_received: self.health_signals_received.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            checks_passed: self.checks_passed.load(Ordering::Relaxed),
            checks_publish_failed: self.checks_publish_failed.load(Ordering::Relaxed),
            checks_timed_out: self.checks_timed_out.load(Ordering::Relaxed),
        }
    }
}
