//! On-demand liveness endpoint (`GET /healthz`, management port).
//!
//! Every request runs exactly one self-test with a fresh id, bounded by
//! `liveness.endpoint_timeout_ms`. Concurrent probes do not interfere: ids
//! never collide and the registry is concurrency-safe.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::{error::CheckFailure, selftest::CheckOutcome, state::SidecarState};

/// `GET /healthz`: 200 `OK` if the relay loop round-trips, 503 otherwise.
pub async fn healthz(State(state): State<Arc<SidecarState>>) -> impl IntoResponse {
    let budget = state.config.liveness.endpoint_timeout();
    let outcome = state.self_test.run_check_within(budget).await;
    status_for(&outcome)
}

/// Map a check outcome to the probe's status code and body.
fn status_for(outcome: &CheckOutcome) -> (StatusCode, &'static str) {
    match outcome {
        CheckOutcome::Passed { .. } => (StatusCode::OK, "OK"),
        CheckOutcome::Failed(CheckFailure::PublishFailed { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "cannot connect to upstream")
        }
        CheckOutcome::Failed(CheckFailure::ObservationTimeout { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "relay loop broken")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{config::LivenessMode, state::test_support::state_with};

    fn healthz_request() -> Request<Body> {
        Request::builder().uri("/healthz").body(Body::empty()).unwrap()
    }

    async fn body_text(body: Body) -> String {
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn returns_503_relay_loop_broken_when_event_never_arrives() {
        let channel = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&channel)
            .await;
        // endpoint budget is 400ms in the test state
        let state = state_with("http://127.0.0.1:1", &channel.uri(), LivenessMode::Endpoint);

        let started = Instant::now();
        let resp = crate::api::management::router(state)
            .oneshot(healthz_request())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(resp.into_body()).await, "relay loop broken");
        assert!(elapsed >= Duration::from_millis(350), "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "exceeded budget: {elapsed:?}");
    }

    #[tokio::test]
    async fn returns_503_cannot_connect_when_channel_is_down() {
        let state = state_with("http://127.0.0.1:1", "http://127.0.0.1:1/channel", LivenessMode::Endpoint);

        let resp = crate::api::management::router(state)
            .oneshot(healthz_request())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(resp.into_body()).await, "cannot connect to upstream");
    }

    #[tokio::test]
    async fn returns_200_when_relay_loop_is_alive() {
        // The mock channel stands in for relay client + ingress and records
        // each published id in the sidecar's registry.
        let channel = MockServer::start().await;
        let state_slot: Arc<std::sync::OnceLock<Arc<SidecarState>>> = Arc::default();
        let slot = Arc::clone(&state_slot);
        Mock::given(method("POST"))
            .respond_with(move |req: &wiremock::Request| {
                if let Some(state) = slot.get() {
                    let signal: crate::signal::HealthSignal =
                        serde_json::from_slice(&req.body).unwrap();
                    state.registry.record(&signal.id);
                }
                ResponseTemplate::new(200)
            })
            .mount(&channel)
            .await;

        let state = state_with("http://127.0.0.1:1", &channel.uri(), LivenessMode::Endpoint);
        state_slot.set(Arc::clone(&state)).ok();

        let resp = crate::api::management::router(Arc::clone(&state))
            .oneshot(healthz_request())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp.into_body()).await, "OK");
        assert!(state.registry.is_empty());
        assert_eq!(state.metrics.snapshot().checks_passed, 1);
    }

    #[tokio::test]
    async fn concurrent_probes_are_independent() {
        let channel = MockServer::start().await;
        let state_slot: Arc<std::sync::OnceLock<Arc<SidecarState>>> = Arc::default();
        let slot = Arc::clone(&state_slot);
        Mock::given(method("POST"))
            .respond_with(move |req: &wiremock::Request| {
                if let Some(state) = slot.get() {
                    let signal: crate::signal::HealthSignal =
                        serde_json::from_slice(&req.body).unwrap();
                    state.registry.record(&signal.id);
                }
                ResponseTemplate::new(200)
            })
            .mount(&channel)
            .await;

        let state = state_with("http://127.0.0.1:1", &channel.uri(), LivenessMode::Endpoint);
        state_slot.set(Arc::clone(&state)).ok();
        let app = crate::api::management::router(Arc::clone(&state));

        let probes = (0..8).map(|_| app.clone().oneshot(healthz_request()));
        let responses = futures_util::future::join_all(probes).await;

        for resp in responses {
            assert_eq!(resp.unwrap().status(), StatusCode::OK);
        }
        assert_eq!(state.metrics.snapshot().checks_passed, 8);
    }

    #[test]
    fn outcome_mapping() {
        let passed = CheckOutcome::Passed { id: "a".into(), elapsed: Duration::ZERO };
        assert_eq!(status_for(&passed), (StatusCode::OK, "OK"));

        let timeout = CheckOutcome::Failed(CheckFailure::ObservationTimeout {
            id: "b".into(),
            waited_ms: 7_000,
        });
        assert_eq!(status_for(&timeout).0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
