//! HTTP surfaces of the sidecar.
//!
//! - [`relay`]: ingress listener (port 8080), every path and method.
//! - [`management`]: metrics and the on-demand health check (port 9100).

pub mod health;
pub mod management;
pub mod metrics;
pub mod relay;
