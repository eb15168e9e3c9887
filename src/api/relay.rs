//! Ingress API (port 8080). The relay client delivers every event here.
//!
//! Each request body is buffered once, classified, and then either recorded
//! as a health signal (short-circuited with 200) or replayed downstream by
//! [`crate::relay::Forwarder`].

use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use tracing::info;

use crate::{error::RelayError, signal::HealthSignal, state::SidecarState};

/// Build the ingress router: a single fallback handler for all paths and methods.
pub fn router(state: Arc<SidecarState>) -> Router {
    Router::new().fallback(relay).with_state(state)
}

/// Any method, any path.
pub async fn relay(
    State(state): State<Arc<SidecarState>>,
    request: Request,
) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.map_err(RelayError::BodyRead)?;

    if let Some(signal) = HealthSignal::classify(&parts.headers, &body) {
        state.registry.record(&signal.id);
        state.metrics.record_health_signal();
        info!(id = %signal.id, "received health check event");
        return Ok((StatusCode::OK, "Health check received").into_response());
    }

    state.metrics.record_relayed();
    info!(
        method = %parts.method,
        target = %state.forwarder.target_url(&parts.uri),
        "relaying regular event"
    );

    let result = state
        .forwarder
        .forward(parts.method, &parts.uri, &parts.headers, body)
        .await;
    if let Err(RelayError::DownstreamUnavailable { .. }) = &result {
        state.metrics.record_forward_failure();
    }
    result
}
