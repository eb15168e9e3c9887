//! Shared application state injected into every handler via [`axum::extract::State`].

use std::{sync::Arc, time::Instant};

use crate::{
    config::Config, metrics::Metrics, registry::CorrelationRegistry, relay::Forwarder,
    selftest::SelfTest,
};

pub struct SidecarState {
    pub config: Arc<Config>,
    /// Health-check ids seen by ingress and not yet claimed by a self-test.
    pub registry: Arc<CorrelationRegistry>,
    pub forwarder: Forwarder,
    pub self_test: Arc<SelfTest>,
    pub metrics: Arc<Metrics>,
    /// Sidecar start time, reported as uptime on the management port.
    pub started_at: Instant,
}

impl SidecarState {
    /// Wire up the core from a validated config. Builds both HTTP clients.
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let registry = Arc::new(CorrelationRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let forwarder = Forwarder::new(&config.downstream)?;
        let self_test = Arc::new(SelfTest::new(
            &config.upstream,
            config.liveness.poll_interval(),
            Arc::clone(&registry),
            Arc::clone(&metrics),
        )?);

        Ok(Self {
            config,
            registry,
            forwarder,
            self_test,
            metrics,
            started_at: Instant::now(),
        })
    }
}
