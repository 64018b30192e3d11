//! Shared fakes for unit tests.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::store::{DurableStore, MemoryStore};
use crate::sync::{Transport, TransportError, TransportResult};

/// Clock that only moves when told to.
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
    })
  }

  pub fn advance(&self, by: TimeDelta) {
    let mut now = self.now.lock().unwrap();
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
  inner: MemoryStore,
  fail_writes: AtomicBool,
}

impl FlakyStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }
}

impl DurableStore for FlakyStore {
  fn load(&self, name: &str) -> Result<Option<Value>> {
    self.inner.load(name)
  }

  fn save(&self, name: &str, value: &Value) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("disk full"));
    }
    self.inner.save(name, value)
  }
}

/// A recorded transport call.
pub type Call = (Method, String, Option<Value>);

/// Pauses the first call made through a [`FakeTransport`].
#[derive(Clone)]
pub struct Gate {
  entered: Arc<Notify>,
  release: Arc<Notify>,
}

impl Gate {
  /// Wait until a call is blocked on this gate.
  pub async fn entered(&self) {
    self.entered.notified().await;
  }

  pub fn release(&self) {
    self.release.notify_one();
  }
}

/// Transport with scripted outcomes that records every call.
pub struct FakeTransport {
  succeed_by_default: bool,
  failing: Mutex<HashSet<String>>,
  calls: Mutex<Vec<Call>>,
  gate: Mutex<Option<Gate>>,
}

impl FakeTransport {
  pub fn succeeding() -> Self {
    Self::with_default(true)
  }

  pub fn failing() -> Self {
    Self::with_default(false)
  }

  fn with_default(succeed_by_default: bool) -> Self {
    Self {
      succeed_by_default,
      failing: Mutex::new(HashSet::new()),
      calls: Mutex::new(Vec::new()),
      gate: Mutex::new(None),
    }
  }

  pub fn fail_endpoint(&self, endpoint: &str) {
    self.failing.lock().unwrap().insert(endpoint.to_string());
  }

  pub fn heal_endpoint(&self, endpoint: &str) {
    self.failing.lock().unwrap().remove(endpoint);
  }

  /// Block the next call until the returned gate is released.
  pub fn hold(&self) -> Gate {
    let gate = Gate {
      entered: Arc::new(Notify::new()),
      release: Arc::new(Notify::new()),
    };
    *self.gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }
}

impl Transport for FakeTransport {
  fn send<'a>(
    &'a self,
    method: Method,
    endpoint: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, TransportResult<Option<Value>>> {
    Box::pin(async move {
      self
        .calls
        .lock()
        .unwrap()
        .push((method, endpoint.to_string(), body.cloned()));

      let gate = self.gate.lock().unwrap().take();
      if let Some(gate) = gate {
        gate.entered.notify_one();
        gate.release.notified().await;
      }

      let fails = self.failing.lock().unwrap().contains(endpoint);
      if fails || !self.succeed_by_default {
        Err(TransportError::Status(StatusCode::SERVICE_UNAVAILABLE))
      } else {
        Ok(Some(serde_json::json!({"ok": true})))
      }
    })
  }
}
