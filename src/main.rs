use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::info;

mod api;
mod config;
mod error;
mod liveness;
mod metrics;
mod registry;
mod relay;
mod selftest;
mod signal;
mod state;

pub use config::Config;

/// Environment variable pointing at the optional TOML config file.
const CONFIG_PATH_ENV: &str = "SIDECAR_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a container liveness probe, inspect the heartbeat file
    // and exit immediately. No shell tools are needed in the image.
    if std::env::args().nth(1).as_deref() == Some("--check-heartbeat") {
        return check_heartbeat();
    }

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smee_sidecar=info,tower_http=warn".into()),
        )
        .init();

    info!("starting smee instrumentation sidecar");

    let config_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!(
        downstream = %config.downstream.base_url,
        channel = %config.upstream.channel_url,
        liveness = %config.liveness.mode,
        "configuration loaded"
    );

    let state = Arc::new(state::SidecarState::new(Arc::new(config))?);
    let config = Arc::clone(&state.config);

    // Bound the registry: ids from checks that already gave up are never claimed.
    tokio::spawn(registry::sweep_loop(
        Arc::clone(&state.registry),
        config.registry.ttl(),
        config.registry.sweep_interval(),
    ));

    if config.liveness.mode.heartbeat_enabled() {
        let reporter = liveness::HeartbeatReporter::new(
            Arc::clone(&state.self_test),
            liveness::HeartbeatMarker::new(&config.liveness.heartbeat_path),
            config.liveness.interval(),
            config.liveness.wait_timeout(),
        );
        tokio::spawn(reporter.run());
    }

    let relay_addr: SocketAddr = format!("0.0.0.0:{}", config.sidecar.relay_port).parse()?;
    let management_addr: SocketAddr =
        format!("0.0.0.0:{}", config.sidecar.management_port).parse()?;

    let relay_listener = tokio::net::TcpListener::bind(relay_addr)
        .await
        .with_context(|| format!("binding relay listener on {relay_addr}"))?;
    let management_listener = tokio::net::TcpListener::bind(management_addr)
        .await
        .with_context(|| format!("binding management listener on {management_addr}"))?;

    info!(%relay_addr, "relay server listening");
    info!(%management_addr, "management server listening");

    // Attach request tracing middleware to both servers
    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let relay_app = api::relay::router(Arc::clone(&state)).layer(trace_layer());
    let management_app = api::management::router(Arc::clone(&state)).layer(trace_layer());

    tokio::select! {
        result = axum::serve(relay_listener, relay_app) => {
            result.context("relay server error")?;
        }
        result = axum::serve(management_listener, management_app) => {
            result.context("management server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Passive probe: exit 0 if the heartbeat file is fresh, 1 otherwise.
/// Invoked via `smee-sidecar --check-heartbeat` from a liveness probe.
fn check_heartbeat() -> anyhow::Result<()> {
    let liveness = match std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from) {
        Some(path) => Config::read_file(&path)?.liveness,
        None => config::LivenessConfig::default(),
    };

    let marker = liveness::HeartbeatMarker::new(&liveness.heartbeat_path);
    let max_age = liveness.max_heartbeat_age();

    if marker.is_fresh(max_age) {
        std::process::exit(0);
    }

    match marker.age() {
        Ok(age) => {
            eprintln!(
                "heartbeat {} is stale: {}s old (max {}s)",
                marker.path().display(),
                age.as_secs(),
                max_age.as_secs()
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("heartbeat unavailable: {e:#}");
            std::process::exit(1);
        }
    }
}
