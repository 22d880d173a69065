//! Transports perform one physical request and report what came back.
//!
//! The orchestrator depends only on [`Transport`]; plain HTTP and browser
//! automation are interchangeable behind it.

#[cfg(feature = "browser")]
pub mod browser;
pub mod reqwest_transport;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::headers::HeaderSet;
use crate::modules::identity::Identity;

#[cfg(feature = "browser")]
pub use browser::BrowserTransport;
pub use reqwest_transport::HttpTransport;

/// One physical attempt's input.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub headers: HeaderSet,
    pub identity: Identity,
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    /// Final URL after redirects.
    pub url: Url,
}

/// Failures that prevented any status or body from being obtained.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport already closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Releases the underlying resources. Idempotent, never fails.
    async fn close(&mut self);
}
