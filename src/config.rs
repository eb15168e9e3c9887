//! Configuration types for smee-sidecar.
//!
//! Config is assembled once at startup and validated before the sidecar opens
//! any ports. Tunables come from an optional TOML file; the two required URLs
//! usually come from the environment (`DOWNSTREAM_SERVICE_URL` and
//! `SMEE_CHANNEL_URL`), which override whatever the file says. A missing or
//! malformed URL is fatal rather than silently defaulted.
//!
//! # Example
//! ```toml
//! [sidecar]
//! relay_port      = 8080
//! management_port = 9100
//!
//! [downstream]
//! base_url   = "http://localhost:8081"
//! timeout_ms = 15000
//!
//! [upstream]
//! channel_url = "https://smee.io/abc123"
//!
//! [liveness]
//! mode           = "both"
//! interval_secs  = 30
//! heartbeat_path = "/tmp/health/live"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Environment variable holding the downstream base URL.
pub const DOWNSTREAM_URL_ENV: &str = "DOWNSTREAM_SERVICE_URL";
/// Environment variable holding the upstream channel URL.
pub const CHANNEL_URL_ENV: &str = "SMEE_CHANNEL_URL";

/// Top-level sidecar configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sidecar: SidecarConfig,

    /// Where regular events are relayed to.
    #[serde(default)]
    pub downstream: DownstreamConfig,

    /// Where synthetic health-check events are published.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Config {
    /// Load config from `path` (or defaults when `None`), then apply the
    /// process environment and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Same as [`load`][Self::load] but reads overrides through `env`, so tests
    /// never have to mutate the real process environment.
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides or validation.
    ///
    /// Used by the `--check-heartbeat` probe, which only needs the liveness
    /// section and may run without the relay URLs in its environment.
    pub fn read_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).context("parsing config TOML")
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = non_empty(DOWNSTREAM_URL_ENV) {
            self.downstream.base_url = url;
        }
        if let Some(url) = non_empty(CHANNEL_URL_ENV) {
            self.upstream.channel_url = url;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.downstream.base_url.trim().is_empty(),
            "{DOWNSTREAM_URL_ENV} must be set (or `[downstream] base_url`)"
        );
        anyhow::ensure!(
            !self.upstream.channel_url.trim().is_empty(),
            "{CHANNEL_URL_ENV} must be set (or `[upstream] channel_url`)"
        );
        validate_http_url("downstream base_url", &self.downstream.base_url)?;
        validate_http_url("upstream channel_url", &self.upstream.channel_url)?;

        anyhow::ensure!(self.downstream.timeout_ms > 0, "downstream timeout_ms must be > 0");
        anyhow::ensure!(self.upstream.publish_timeout_ms > 0, "upstream publish_timeout_ms must be > 0");

        let liveness = &self.liveness;
        anyhow::ensure!(liveness.interval_secs > 0, "liveness interval_secs must be > 0");
        anyhow::ensure!(liveness.poll_interval_ms > 0, "liveness poll_interval_ms must be > 0");
        anyhow::ensure!(liveness.wait_timeout_ms > 0, "liveness wait_timeout_ms must be > 0");
        anyhow::ensure!(liveness.endpoint_timeout_ms > 0, "liveness endpoint_timeout_ms must be > 0");

        anyhow::ensure!(self.registry.ttl_secs > 0, "registry ttl_secs must be > 0");
        anyhow::ensure!(
            self.registry.sweep_interval_secs > 0,
            "registry sweep_interval_secs must be > 0"
        );

        Ok(())
    }
}

fn validate_http_url(field: &str, raw: &str) -> anyhow::Result<()> {
    let url = Url::parse(raw).with_context(|| format!("{field} `{raw}` is not a valid URL"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "{field} `{raw}` must use http or https"
    );
    Ok(())
}

/// Listener ports.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidecarConfig {
    /// Port receiving events from the relay client (default: 8080).
    #[serde(default = "defaults::relay_port")]
    pub relay_port: u16,

    /// Port serving `/metrics` and the on-demand `/healthz` (default: 9100).
    #[serde(default = "defaults::management_port")]
    pub management_port: u16,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            relay_port: defaults::relay_port(),
            management_port: defaults::management_port(),
        }
    }
}

/// The single fixed service that regular events are relayed to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Base URL; the inbound path and query are appended verbatim.
    #[serde(default)]
    pub base_url: String,

    /// Per-request timeout in milliseconds (default: 15 000).
    #[serde(default = "defaults::forward_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: defaults::forward_timeout_ms(),
        }
    }
}

impl DownstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The event channel the relay client subscribes to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub channel_url: String,

    /// Timeout for publishing a synthetic event (default: 5 000).
    #[serde(default = "defaults::publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Treat a non-2xx publish response as a failed check (default: false).
    ///
    /// Off by default: some channels answer with redirects or 202-style codes
    /// that still deliver the event, and the round trip itself is the real test.
    #[serde(default)]
    pub require_success_status: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            channel_url: String::new(),
            publish_timeout_ms: defaults::publish_timeout_ms(),
            require_success_status: false,
        }
    }
}

impl UpstreamConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Which liveness reporter(s) to run on top of the self-test core.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMode {
    /// Background loop maintaining a heartbeat file for a passive file probe.
    #[default]
    Heartbeat,
    /// `GET /healthz` on the management port runs one check per request.
    Endpoint,
    /// Run both reporters against the same registry.
    Both,
}

impl LivenessMode {
    pub fn heartbeat_enabled(self) -> bool {
        matches!(self, Self::Heartbeat | Self::Both)
    }

    pub fn endpoint_enabled(self) -> bool {
        matches!(self, Self::Endpoint | Self::Both)
    }
}

impl std::fmt::Display for LivenessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Heartbeat => "heartbeat",
            Self::Endpoint => "endpoint",
            Self::Both => "both",
        })
    }
}

/// Self-test scheduling and reporting.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LivenessConfig {
    #[serde(default)]
    pub mode: LivenessMode,

    /// Period of the heartbeat loop in seconds (default: 30).
    #[serde(default = "defaults::interval_secs")]
    pub interval_secs: u64,

    /// How long the heartbeat loop waits for its event to come back (default: 20 000).
    #[serde(default = "defaults::wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Total budget of one on-demand `/healthz` check (default: 7 000).
    #[serde(default = "defaults::endpoint_timeout_ms")]
    pub endpoint_timeout_ms: u64,

    /// Fallback recheck interval while waiting on the registry (default: 100).
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Heartbeat marker file (default: `/tmp/health/live`).
    #[serde(default = "defaults::heartbeat_path")]
    pub heartbeat_path: PathBuf,

    /// Oldest marker `--check-heartbeat` accepts. Defaults to 3 × `interval_secs`.
    #[serde(default)]
    pub max_heartbeat_age_secs: Option<u64>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            mode: LivenessMode::default(),
            interval_secs: defaults::interval_secs(),
            wait_timeout_ms: defaults::wait_timeout_ms(),
            endpoint_timeout_ms: defaults::endpoint_timeout_ms(),
            poll_interval_ms: defaults::poll_interval_ms(),
            heartbeat_path: defaults::heartbeat_path(),
            max_heartbeat_age_secs: None,
        }
    }
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_heartbeat_age(&self) -> Duration {
        Duration::from_secs(
            self.max_heartbeat_age_secs
                .unwrap_or(self.interval_secs.saturating_mul(3)),
        )
    }
}

/// Bounds on unclaimed health signals.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Entries older than this are dropped by the sweeper (default: 300).
    #[serde(default = "defaults::registry_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the sweeper runs (default: 60).
    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::registry_ttl_secs(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn relay_port() -> u16 { 8080 }
    pub fn management_port() -> u16 { 9100 }
    pub fn forward_timeout_ms() -> u64 { 15_000 }
    pub fn publish_timeout_ms() -> u64 { 5_000 }
    pub fn interval_secs() -> u64 { 30 }
    pub fn wait_timeout_ms() -> u64 { 20_000 }
    pub fn endpoint_timeout_ms() -> u64 { 7_000 }
    pub fn poll_interval_ms() -> u64 { 100 }
    pub fn heartbeat_path() -> PathBuf { PathBuf::from("/tmp/health/live") }
    pub fn registry_ttl_secs() -> u64 { 300 }
    pub fn sweep_interval_secs() -> u64 { 60 }
}
