//! Closed-loop self-test of the relay path.
//!
//! One check publishes a uniquely-identified [`HealthSignal`] to the upstream
//! channel and then waits for the ingress listener to record that same id in
//! the [`CorrelationRegistry`]. A pass proves the whole loop (channel, relay
//! client, ingress) is live; a failure does not say which hop broke.
//!
//! Publish and wait carry separate deadlines, so a slow publish never eats
//! into the wait budget of [`SelfTest::run_check`]. The on-demand endpoint
//! uses [`SelfTest::run_check_within`] instead, which fits both steps into a
//! single overall budget.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use reqwest::Client;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::UpstreamConfig,
    error::CheckFailure,
    metrics::Metrics,
    registry::CorrelationRegistry,
    signal::HealthSignal,
};

/// Result of one self-test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The synthetic event came back through ingress and was claimed.
    Passed { id: String, elapsed: Duration },
    Failed(CheckFailure),
}

impl CheckOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Passed { id, .. } => id,
            Self::Failed(failure) => failure.id(),
        }
    }
}

/// Check initiator shared by every liveness reporter.
pub struct SelfTest {
    client: Client,
    channel_url: String,
    publish_timeout: Duration,
    require_success_status: bool,
    poll_interval: Duration,
    registry: Arc<CorrelationRegistry>,
    metrics: Arc<Metrics>,
}

impl SelfTest {
    pub fn new(
        cfg: &UpstreamConfig,
        poll_interval: Duration,
        registry: Arc<CorrelationRegistry>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        // Per-request timeouts are applied in publish(); the run_check_within
        // path may shorten them.
        let client = Client::builder()
            .build()
            .context("building upstream reqwest client")?;

        Ok(Self {
            client,
            channel_url: cfg.channel_url.clone(),
            publish_timeout: cfg.publish_timeout(),
            require_success_status: cfg.require_success_status,
            poll_interval,
            registry,
            metrics,
        })
    }

    /// Publish a fresh event and wait up to `wait_timeout` for it to come back.
    ///
    /// The publish step has its own deadline (`publish_timeout_ms`) on top of
    /// `wait_timeout`.
    pub async fn run_check(&self, wait_timeout: Duration) -> CheckOutcome {
        self.execute(self.publish_timeout, |_| wait_timeout).await
    }

    /// Like [`run_check`][Self::run_check], but publish and wait together take
    /// no longer than `budget` (plus one poll interval at most).
    pub async fn run_check_within(&self, budget: Duration) -> CheckOutcome {
        self.execute(self.publish_timeout.min(budget), |spent| budget.saturating_sub(spent))
            .await
    }

    #[tracing::instrument(name = "self_test", skip_all, fields(id = tracing::field::Empty))]
    async fn execute<F>(&self, publish_timeout: Duration, wait_budget: F) -> CheckOutcome
    where
        F: FnOnce(Duration) -> Duration,
    {
        let id = Uuid::new_v4().to_string();
        tracing::Span::current().record("id", id.as_str());
        info!(channel = %self.channel_url, "running self-test");

        let started = Instant::now();
        let outcome = match self.publish(&id, publish_timeout).await {
            Err(failure) => CheckOutcome::Failed(failure),
            Ok(()) => {
                let wait = wait_budget(started.elapsed());
                if self.registry.wait_for(&id, wait, self.poll_interval).await {
                    CheckOutcome::Passed { id, elapsed: started.elapsed() }
                } else {
                    CheckOutcome::Failed(CheckFailure::ObservationTimeout {
                        id,
                        waited_ms: wait.as_millis() as u64,
                    })
                }
            }
        };

        match &outcome {
            CheckOutcome::Passed { elapsed, .. } => {
                info!(elapsed_ms = elapsed.as_millis() as u64, "self-test passed");
            }
            CheckOutcome::Failed(failure) => {
                warn!(reason = failure.kind(), error = %failure, "self-test failed");
            }
        }
        self.metrics.record_check(&outcome);
        outcome
    }

    async fn publish(&self, id: &str, timeout: Duration) -> Result<(), CheckFailure> {
        let publish_failed = |reason: String| CheckFailure::PublishFailed {
            id: id.to_string(),
            url: self.channel_url.clone(),
            reason,
        };

        let response = self
            .client
            .post(&self.channel_url)
            .timeout(timeout)
            .json(&HealthSignal::new(id))
            .send()
            .await
            .map_err(|e| publish_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if self.require_success_status {
                return Err(publish_failed(format!("channel returned HTTP {status}")));
            }
            debug!(%status, "channel answered with non-success status; waiting anyway");
        }
        Ok(())
    }
}
