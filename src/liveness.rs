//! Passive liveness reporting through a heartbeat file.
//!
//! [`HeartbeatReporter`] runs one self-test immediately at startup and then
//! once per interval. A pass writes the current unix time into the
//! [`HeartbeatMarker`]; any failure deletes it. An external probe treats a
//! missing or stale marker as unhealthy; `smee-sidecar --check-heartbeat` is
//! such a probe.
//!
//! The active counterpart (one check per HTTP request) lives in
//! [`crate::api::health`]. Both sit on the same [`SelfTest`] and registry.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::selftest::{CheckOutcome, SelfTest};

/// File holding the unix timestamp of the last passing self-test.
#[derive(Debug, Clone)]
pub struct HeartbeatMarker {
    path: PathBuf,
}

impl HeartbeatMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current unix time, creating the parent directory if needed.
    pub async fn refresh(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, Utc::now().timestamp().to_string()).await
    }

    /// Delete the marker. A marker that is already gone is not an error.
    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Age of the marker according to the timestamp it contains.
    ///
    /// Used by the probe CLI, so it is synchronous.
    pub fn age(&self) -> anyhow::Result<Duration> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let written: i64 = content
            .trim()
            .parse()
            .with_context(|| format!("{} does not hold a unix timestamp", self.path.display()))?;
        let age_secs = Utc::now().timestamp().saturating_sub(written).max(0);
        Ok(Duration::from_secs(age_secs as u64))
    }

    /// Whether the marker exists and is no older than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age().is_ok_and(|age| age <= max_age)
    }
}

/// Background loop keeping the heartbeat marker fresh while the relay loop works.
pub struct HeartbeatReporter {
    self_test: Arc<SelfTest>,
    marker: HeartbeatMarker,
    interval: Duration,
    wait_timeout: Duration,
}

impl HeartbeatReporter {
    pub fn new(
        self_test: Arc<SelfTest>,
        marker: HeartbeatMarker,
        interval: Duration,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            self_test,
            marker,
            interval,
            wait_timeout,
        }
    }

    /// Run one check and update the marker from its outcome.
    pub async fn tick(&self) -> CheckOutcome {
        let outcome = self.self_test.run_check(self.wait_timeout).await;
        self.apply(&outcome).await;
        outcome
    }

    async fn apply(&self, outcome: &CheckOutcome) {
        let path = self.marker.path().display();
        let id = outcome.id();
        if outcome.is_passed() {
            match self.marker.refresh().await {
                Ok(()) => info!(%path, id, "heartbeat refreshed"),
                Err(e) => warn!(%path, id, error = %e, "could not write heartbeat file"),
            }
        } else {
            info!(%path, id, "removing heartbeat file to trigger probe failure");
            if let Err(e) = self.marker.clear().await {
                warn!(%path, id, error = %e, "could not remove heartbeat file");
            }
        }
    }

    /// Run forever: first check immediately, then one per interval.
    ///
    /// A check that overruns the interval delays the next one rather than
    /// triggering a burst of catch-up checks.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            path = %self.marker.path().display(),
            interval_secs = self.interval.as_secs(),
            "heartbeat reporter started"
        );

        loop {
            // The first tick completes immediately.
            interval.tick().await;
            self.tick().await;
        }
    }
}
