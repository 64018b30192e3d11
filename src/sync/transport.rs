//! Transport abstraction for replaying queued operations.
//!
//! Provides a trait-based transport layer that enables:
//! - Real HTTP calls via reqwest for production
//! - Scripted transports for unit testing

use futures::future::BoxFuture;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Error type for transport operations.
///
/// Every variant counts as a failed attempt; the synchronizer does not
/// distinguish between them beyond logging.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// The endpoint could not be turned into a URL.
  #[error("invalid endpoint {endpoint}: {message}")]
  InvalidEndpoint { endpoint: String, message: String },

  /// The request did not complete in time.
  #[error("request timed out")]
  Timeout,

  /// Connection refused, DNS failure, reset, and similar.
  #[error("request failed: {0}")]
  Request(String),

  /// The server answered with a non-success status.
  #[error("server returned {0}")]
  Status(StatusCode),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A network call collaborator.
///
/// Success means transport-level success (2xx); the response body is
/// returned as JSON when there is one, but it is not inspected.
pub trait Transport: Send + Sync {
  fn send<'a>(
    &'a self,
    method: Method,
    endpoint: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, TransportResult<Option<Value>>>;
}

/// HTTP transport that resolves endpoints against a base URL.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: Url, timeout: Duration) -> TransportResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Request(e.to_string()))?;

    Ok(Self { client, base_url })
  }

  /// Resolve `endpoint` against the base URL. Absolute URLs pass through.
  pub fn resolve(&self, endpoint: &str) -> TransportResult<Url> {
    self
      .base_url
      .join(endpoint)
      .map_err(|e| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
      })
  }

  async fn execute(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> TransportResult<Option<Value>> {
    let url = self.resolve(endpoint)?;
    let mut request = self.client.request(method, url);
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::Status(status));
    }

    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    if bytes.is_empty() {
      return Ok(None);
    }
    // Non-JSON bodies are fine; the call itself succeeded
    Ok(serde_json::from_slice(&bytes).ok())
  }
}

impl Transport for HttpTransport {
  fn send<'a>(
    &'a self,
    method: Method,
    endpoint: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, TransportResult<Option<Value>>> {
    Box::pin(self.execute(method, endpoint, body))
  }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::Timeout
  } else {
    TransportError::Request(e.to_string())
  }
}
