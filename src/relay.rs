//! Downstream forwarding for regular events.
//!
//! The request is replayed verbatim (method, path + query, headers, body)
//! against the fixed downstream base URL, and the downstream response is
//! streamed back as-is. There are no retries: a transport failure surfaces as
//! [`RelayError::DownstreamUnavailable`] and the relay client decides what to
//! do about it.

use anyhow::Context;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, Method, Uri},
    response::Response,
};
use bytes::Bytes;
use futures_util::TryStreamExt as _;
use reqwest::Client;
use tracing::warn;

use crate::{config::DownstreamConfig, error::RelayError};

/// Connection-scoped headers owned by each hop's HTTP stack, never relayed.
static HOP_BY_HOP: [HeaderName; 5] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// HTTP client bound to the downstream service.
///
/// Built once at startup; [`reqwest::Client`] pools connections internally
/// and is shared by every in-flight request.
pub struct Forwarder {
    client: Client,
    base_url: String,
}

impl Forwarder {
    pub fn new(cfg: &DownstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("building downstream reqwest client")?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Downstream URL for an inbound URI: base URL + original path and query.
    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Replay one inbound request downstream and mirror the answer.
    ///
    /// # Errors
    /// [`RelayError::OutboundBuild`] if the outbound request is malformed,
    /// [`RelayError::DownstreamUnavailable`] if the downstream cannot be
    /// reached or does not answer within the configured timeout.
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, RelayError> {
        let url = self.target_url(uri);

        let mut outbound_headers = headers.clone();
        // Host is derived from the downstream URL by the client.
        outbound_headers.remove(header::HOST);
        strip_hop_by_hop(&mut outbound_headers);

        let request = self
            .client
            .request(method, &url)
            .headers(outbound_headers)
            .body(body)
            .build()
            .map_err(|source| RelayError::OutboundBuild { url: url.clone(), source })?;

        let downstream = self
            .client
            .execute(request)
            .await
            .map_err(|source| RelayError::DownstreamUnavailable { url: url.clone(), source })?;

        Ok(mirror(downstream, url))
    }
}

/// Turn a downstream response into an axum response, streaming the body.
///
/// Status and headers are committed before the body is read, so a failure
/// mid-body can only be logged; the stream ends early and the caller sees a
/// truncated body.
fn mirror(downstream: reqwest::Response, url: String) -> Response {
    let status = downstream.status();
    let mut headers = downstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let stream = downstream.bytes_stream().inspect_err(move |e| {
        warn!(%url, error = %e, "error writing response body");
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}
