//! Management API (port 9100): metrics scrape and the active liveness probe.

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::state::SidecarState;

/// Build the management router. `/healthz` exists only when the endpoint
/// reporter is enabled (`liveness.mode` = `endpoint` or `both`).
pub fn router(state: Arc<SidecarState>) -> Router {
    let mut router = Router::new().route("/metrics", get(super::metrics::metrics));
    if state.config.liveness.mode.endpoint_enabled() {
        router = router.route("/healthz", get(super::health::healthz));
    }
    router.with_state(state)
}
