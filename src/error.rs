//! Error types for the relay path and the self-test.
//!
//! [`RelayError`] covers everything that can go wrong while handling one
//! inbound event and converts into an HTTP response via [`IntoResponse`], so
//! the ingress handler can return `Result<Response, RelayError>` and propagate
//! with `?`. None of these are retried; the relay client is expected to retry
//! per its own policy.
//!
//! [`CheckFailure`] is the failure half of a self-test outcome. It is never
//! turned into a 500: the liveness reporters map it to their own signal.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failure while relaying a regular event.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound request body could not be read in full.
    #[error("cannot read request body: {0}")]
    BodyRead(#[source] axum::Error),

    /// The outbound request to the downstream could not be constructed.
    #[error("error creating proxy request for {url}: {source}")]
    OutboundBuild {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The downstream could not be reached (connect, timeout, transport).
    #[error("error forwarding request to {url}: {source}")]
    DownstreamUnavailable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BodyRead(_) | Self::OutboundBuild { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DownstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short plain-text body returned to the caller; the detail stays in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            Self::BodyRead(_) => "cannot read request body",
            Self::OutboundBuild { .. } => "error creating proxy request",
            Self::DownstreamUnavailable { .. } => "error forwarding request",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = status.as_u16(), "relay error");
        (status, self.public_message()).into_response()
    }
}

/// Why a self-test did not pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckFailure {
    /// The synthetic event could not be published; nothing was waited for.
    #[error("publish failed for check {id} to {url}: {reason}")]
    PublishFailed { id: String, url: String, reason: String },

    /// The synthetic event did not come back through ingress in time.
    #[error("timeout, event {id} not observed within {waited_ms}ms")]
    ObservationTimeout { id: String, waited_ms: u64 },
}

impl CheckFailure {
    /// Stable label used in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PublishFailed { .. } => "publish_failed",
            Self::ObservationTimeout { .. } => "timeout",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::PublishFailed { id, .. } | Self::ObservationTimeout { id, .. } => id,
        }
    }
}
