//! Network transport for batches

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{TelemetryError, TelemetryResult, TransportError, TransportResult};

/// Backend endpoint a batch is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Event batches
    Track,
    /// Profile mutation batches
    Engage,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Track => "/track/",
            Endpoint::Engage => "/engage/",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Backend verdict on a delivered batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Stored by the backend
    Accepted,
    /// Refused for good; resending would not help
    Rejected(String),
}

/// Sends one encoded batch
///
/// Implementations must not retry internally: a failed batch is retried by
/// the next flush cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: Endpoint, body: String) -> TransportResult<BatchOutcome>;
}

/// HTTP transport backed by reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TelemetryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &ClientConfig) -> TelemetryResult<Self> {
        Self::new(config.server_url.clone(), config.request_timeout())
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: Endpoint, body: String) -> TransportResult<BatchOutcome> {
        let url = self.url(endpoint);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        debug!(%url, status = status.as_u16(), "Batch response");
        classify_response(status, &text)
    }
}

/// Map an HTTP response onto an outcome
///
/// 5xx is a transport failure, 4xx a rejection. On 2xx the body decides:
/// `1` accepted, `0` rejected, anything else a transport failure.
pub fn classify_response(status: StatusCode, body: &str) -> TransportResult<BatchOutcome> {
    if status.is_server_error() {
        return Err(TransportError::Server(status.as_u16()));
    }
    if status.is_client_error() {
        return Ok(BatchOutcome::Rejected(format!("HTTP {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(TransportError::UnexpectedResponse(format!(
            "HTTP {}",
            status.as_u16()
        )));
    }

    match body.trim() {
        "1" => Ok(BatchOutcome::Accepted),
        "0" => Ok(BatchOutcome::Rejected("backend returned 0".to_string())),
        other => Err(TransportError::UnexpectedResponse(other.to_string())),
    }
}
