//! Pending operation types.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What a queued operation does to its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
  /// Deferred read
  Fetch,
}

impl OperationKind {
  /// HTTP method used to replay this kind of operation.
  pub fn method(self) -> Method {
    match self {
      Self::Fetch => Method::GET,
      Self::Create => Method::POST,
      Self::Update => Method::PUT,
      Self::Delete => Method::DELETE,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Fetch => "fetch",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OperationKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "create" | "post" => Ok(Self::Create),
      "update" | "put" => Ok(Self::Update),
      "delete" => Ok(Self::Delete),
      "fetch" | "get" => Ok(Self::Fetch),
      other => Err(format!("unknown operation kind: {}", other)),
    }
  }
}

/// A side effect (or deferred read) waiting to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
  /// Creation-timestamp-derived id, unique within the queue
  pub id: String,
  pub kind: OperationKind,
  /// Target address, opaque to the queue
  pub endpoint: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far; never decreases
  #[serde(default)]
  pub retry_count: u32,
}

impl PendingOperation {
  /// Whether this entry has used up its replay attempts.
  pub fn is_exhausted(&self, max_retries: u32) -> bool {
    self.retry_count >= max_retries
  }
}
