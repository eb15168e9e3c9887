//! Prometheus-compatible `/metrics` endpoint.
//!
//! Counters are process-lifetime totals and never decrease. Metric families:
//! - `smee_events_relayed_total`               regular events relayed downstream
//! - `smee_health_signals_received_total`      health-check events seen by ingress
//! - `smee_forward_failures_total`             downstream transport failures
//! - `smee_self_tests_total{outcome=...}`      self-test results
//! - `smee_pending_health_checks`              ids observed but not yet claimed
//! - `smee_sidecar_uptime_seconds`             seconds since startup

use std::{fmt::Write as _, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::{metrics::MetricsSnapshot, state::SidecarState};

/// `GET /metrics`: renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<SidecarState>>) -> impl IntoResponse {
    let body = render(
        &state.metrics.snapshot(),
        state.registry.len(),
        state.started_at.elapsed().as_secs(),
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(snap: &MetricsSnapshot, pending: usize, uptime_secs: u64) -> String {
    let mut out = String::with_capacity(1024);

    family(
        &mut out,
        "smee_events_relayed_total",
        "counter",
        "Total number of regular events relayed by the sidecar.",
    );
    let _ = writeln!(out, "smee_events_relayed_total {}\n", snap.events_relayed);

    family(
        &mut out,
        "smee_health_signals_received_total",
        "counter",
        "Health-check events received on the ingress listener.",
    );
    let _ = writeln!(out, "smee_health_signals_received_total {}\n", snap.health_signals_received);

    family(
        &mut out,
        "smee_forward_failures_total",
        "counter",
        "Regular events that could not be delivered to the downstream service.",
    );
    let _ = writeln!(out, "smee_forward_failures_total {}\n", snap.forward_failures);

    family(
        &mut out,
        "smee_self_tests_total",
        "counter",
        "Self-test runs, labelled by outcome.",
    );
    for (outcome, count) in [
        ("passed", snap.checks_passed),
        ("publish_failed", snap.checks_publish_failed),
        ("timeout", snap.checks_timed_out),
    ] {
        let _ = writeln!(out, "smee_self_tests_total{{outcome=\"{outcome}\"}} {count}");
    }
    out.push('\n');

    family(
        &mut out,
        "smee_pending_health_checks",
        "gauge",
        "Health-check ids observed by ingress and not yet claimed.",
    );
    let _ = writeln!(out, "smee_pending_health_checks {pending}\n");

    family(&mut out, "smee_sidecar_uptime_seconds", "gauge", "Seconds since the sidecar started.");
    let _ = writeln!(out, "smee_sidecar_uptime_seconds {uptime_secs}");

    out
}

fn family(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}
