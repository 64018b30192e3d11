//! The offline service: one owned object wiring monitor, cache, queue and sync.
//!
//! Create it once per process, call [`OfflineService::init`] to load
//! persisted state and [`OfflineService::start`] to enable reconnect-driven
//! sync, then hand out references.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, DataCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, LinkClassifier, Subscription};
use crate::error::OfflineResult;
use crate::policy::{self, PolicySnapshot};
use crate::queue::{OperationKind, PendingOperation, PendingQueue};
use crate::store::{DurableStore, MemoryStore, SqliteStore};
use crate::sync::{
  auto_sync_on_reconnect, spawn_trigger_loop, DrainReport, HttpTransport, SyncTrigger,
  Synchronizer, Transport,
};

/// What happened to a mutation handed to [`OfflineService::mutate_or_enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
  /// The server accepted it; carries the response body if it was JSON.
  Sent(Option<Value>),
  /// Offline or the call failed; it will be replayed later.
  Queued(PendingOperation),
}

/// Counts of entries restored by [`OfflineService::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitSummary {
  pub cached_entries: usize,
  pub pending_operations: usize,
}

/// One start/shutdown cycle, with its own cancellation token.
struct Background {
  trigger_loop: JoinHandle<()>,
  subscription: Subscription,
  cancel: CancellationToken,
}

/// Connectivity-aware facade used by the UI.
pub struct OfflineService {
  monitor: Arc<ConnectivityMonitor>,
  cache: Arc<DataCache>,
  queue: Arc<PendingQueue>,
  synchronizer: Arc<Synchronizer>,
  transport: Arc<dyn Transport>,
  default_ttl_hours: f64,
  background: Mutex<Option<Background>>,
}

impl OfflineService {
  pub fn new(
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    classifier: LinkClassifier,
  ) -> Self {
    let queue = Arc::new(PendingQueue::new(store.clone(), clock.clone()));
    let synchronizer = Arc::new(Synchronizer::new(queue.clone(), transport.clone()));

    Self {
      monitor: Arc::new(ConnectivityMonitor::new(classifier)),
      cache: Arc::new(DataCache::new(store, clock)),
      queue,
      synchronizer,
      transport,
      default_ttl_hours: 2.0,
      background: Mutex::new(None),
    }
  }

  /// Build the service from configuration: SQLite (or memory) storage and
  /// an HTTP transport against `api.base_url`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let store: Arc<dyn DurableStore> = if config.storage.in_memory {
      Arc::new(MemoryStore::new())
    } else {
      match &config.storage.path {
        Some(path) => Arc::new(SqliteStore::open_at(path)?),
        None => Arc::new(SqliteStore::open()?),
      }
    };

    let base_url = url::Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", config.api.base_url, e))?;
    let transport = HttpTransport::new(
      base_url,
      Duration::from_secs(config.api.request_timeout_secs),
    )
    .map_err(|e| eyre!("Failed to create HTTP transport: {}", e))?;

    Ok(
      Self::new(
        store,
        Arc::new(transport),
        Arc::new(SystemClock),
        config.connectivity.classifier(),
      )
      .with_max_retries(config.sync.max_retries)
      .with_default_ttl_hours(config.cache.default_ttl_hours),
    )
  }

  /// Set the retry cap. Must be called before [`OfflineService::start`].
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    let sync = Synchronizer::new(self.queue.clone(), self.transport.clone())
      .with_max_retries(max_retries);
    self.synchronizer = Arc::new(sync);
    self
  }

  /// TTL used by fetch helpers when the caller does not pass one.
  pub fn with_default_ttl_hours(mut self, ttl_hours: f64) -> Self {
    self.default_ttl_hours = ttl_hours;
    self
  }

  /// Load persisted cache and queue. A corrupt store counts as empty.
  pub fn init(&self) -> InitSummary {
    let summary = InitSummary {
      cached_entries: self.cache.init(),
      pending_operations: self.queue.init(),
    };
    info!(
      cached_entries = summary.cached_entries,
      pending_operations = summary.pending_operations,
      "Offline service initialized"
    );
    summary
  }

  /// Start draining automatically whenever an unmetered link comes up.
  ///
  /// If the link is already unmetered and work is pending, a drain is
  /// requested right away. Must run inside a tokio runtime. Calling it while
  /// already started is a no-op; calling it after `shutdown()` starts again.
  pub fn start(&self) {
    let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
    if background.is_some() {
      return;
    }

    let cancel = CancellationToken::new();
    let (trigger, rx) = SyncTrigger::channel();
    let trigger_loop = spawn_trigger_loop(self.synchronizer.clone(), rx, cancel.clone());
    let subscription = auto_sync_on_reconnect(&self.monitor, trigger.clone());

    if self.should_auto_sync() && self.queue.count() > 0 {
      debug!("Unmetered link and pending work at start, triggering sync");
      trigger.fire();
    }

    *background = Some(Background {
      trigger_loop,
      subscription,
      cancel,
    });
    debug!("Auto-sync enabled");
  }

  /// Stop background sync and wait for an in-flight drain to notice.
  pub async fn shutdown(&self) {
    let background = self
      .background
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();

    if let Some(bg) = background {
      bg.cancel.cancel();
      bg.subscription.unsubscribe();
      if let Err(e) = bg.trigger_loop.await {
        warn!(error = %e, "Sync trigger loop ended abnormally");
      }
    }
  }

  pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
    &self.monitor
  }

  pub fn cache(&self) -> &DataCache {
    &self.cache
  }

  pub fn queue(&self) -> &PendingQueue {
    &self.queue
  }

  pub fn synchronizer(&self) -> &Synchronizer {
    &self.synchronizer
  }

  /// Feed a host connectivity event.
  pub fn handle_connectivity(&self, connected: bool, raw_type: &str) -> ConnectivityState {
    self.monitor.handle_event(connected, raw_type)
  }

  pub fn should_warn_before_metered_use(&self) -> bool {
    policy::should_warn_before_metered_use(&self.monitor.current())
  }

  pub fn is_offline(&self) -> bool {
    policy::is_offline(&self.monitor.current())
  }

  pub fn should_auto_sync(&self) -> bool {
    policy::should_auto_sync(&self.monitor.current())
  }

  pub fn pending_count(&self) -> usize {
    self.queue.count()
  }

  pub fn policy(&self) -> PolicySnapshot {
    PolicySnapshot::new(&self.monitor.current(), self.queue.count())
  }

  /// Drain the queue now (manual "sync now"). Shares the reentrancy guard
  /// with automatic drains; `shutdown()` cancels it while started.
  pub async fn sync_now(&self) -> DrainReport {
    let cancel = self.current_cancel();
    self.synchronizer.drain(&cancel).await
  }

  fn current_cancel(&self) -> CancellationToken {
    self
      .background
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .map(|bg| bg.cancel.clone())
      .unwrap_or_else(CancellationToken::new)
  }

  /// Opportunistic housekeeping when the app comes back to the foreground:
  /// sweep expired cache entries and drain if the link allows it.
  pub async fn on_resume(&self) -> Option<DrainReport> {
    match self.cache.evict_expired() {
      Ok(removed) if removed > 0 => debug!(removed, "Swept expired cache entries on resume"),
      Ok(_) => {}
      Err(e) => warn!(error = %e, "Failed to persist cache sweep"),
    }

    if self.should_auto_sync() && self.queue.count() > 0 {
      Some(self.sync_now().await)
    } else {
      None
    }
  }

  /// Cache-first read: serve an unexpired entry, otherwise fetch and cache.
  ///
  /// When offline with nothing cached, fails without calling `fetcher`.
  pub async fn fetch_cached<T, F, Fut>(
    &self,
    key: &str,
    ttl_hours: Option<f64>,
    fetcher: F,
  ) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(hit) = self.cached::<T>(key) {
      return Ok(CacheResult::from_cache(hit.0, hit.1));
    }

    if self.is_offline() {
      return Err(eyre!("Offline and nothing cached for {}", key));
    }

    let data = fetcher().await?;
    self.store_fetched(key, &data, ttl_hours);
    Ok(CacheResult::from_network(data))
  }

  /// Network-first read with cache fallback.
  ///
  /// Online: fetch, cache and return the fresh data; if the fetch fails,
  /// serve the cached copy. Offline: serve the cached copy without calling
  /// `fetcher`. Fails only when there is no usable copy.
  pub async fn fetch_fresh<T, F, Fut>(
    &self,
    key: &str,
    ttl_hours: Option<f64>,
    fetcher: F,
  ) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if self.is_offline() {
      return match self.cached::<T>(key) {
        Some((data, cached_at)) => Ok(CacheResult::offline(data, cached_at)),
        None => Err(eyre!("Offline and nothing cached for {}", key)),
      };
    }

    match fetcher().await {
      Ok(data) => {
        self.store_fetched(key, &data, ttl_hours);
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match self.cached::<T>(key) {
        Some((data, cached_at)) => {
          debug!(key, error = %e, "Fetch failed, serving cached copy");
          Ok(CacheResult::offline(data, cached_at))
        }
        None => Err(e),
      },
    }
  }

  /// Send a mutation now if possible, otherwise queue it for replay.
  ///
  /// A storage error only means the queued entry is not durable yet; it is
  /// still queued in memory.
  pub async fn mutate_or_enqueue(
    &self,
    kind: OperationKind,
    endpoint: &str,
    body: Option<Value>,
  ) -> OfflineResult<MutationOutcome> {
    if !self.is_offline() {
      match self.transport.send(kind.method(), endpoint, body.as_ref()).await {
        Ok(response) => return Ok(MutationOutcome::Sent(response)),
        Err(e) => warn!(endpoint, %kind, error = %e, "Request failed, queueing for later"),
      }
    }

    let op = self.queue.enqueue(kind, endpoint, body)?;
    Ok(MutationOutcome::Queued(op))
  }

  fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
    let entry = self.cache.get_entry(key)?;
    match serde_json::from_value(entry.payload) {
      Ok(data) => Some((data, entry.stored_at)),
      Err(e) => {
        warn!(key, error = %e, "Cached payload has unexpected shape, ignoring");
        None
      }
    }
  }

  fn store_fetched<T: Serialize>(&self, key: &str, data: &T, ttl_hours: Option<f64>) {
    let payload = match serde_json::to_value(data) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(key, error = %e, "Fetched data is not JSON-serializable, not caching");
        return;
      }
    };

    let ttl = ttl_hours.unwrap_or(self.default_ttl_hours);
    if let Err(e) = self.cache.put(key, payload, ttl) {
      warn!(key, error = %e, "Failed to cache fetched data");
    }
  }
}

impl Drop for OfflineService {
  fn drop(&mut self) {
    let background = self.background.get_mut().unwrap_or_else(PoisonError::into_inner);
    if let Some(bg) = background {
      bg.cancel.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{FakeTransport, ManualClock};
  use chrono::TimeDelta;
  use serde_json::json;

  fn service_with(store: Arc<dyn DurableStore>, transport: Arc<FakeTransport>) -> OfflineService {
    let service = OfflineService::new(
      store,
      transport,
      ManualClock::new(),
      LinkClassifier::default(),
    );
    service.init();
    service
  }

  async fn wait_until_drained(service: &OfflineService) {
    tokio::time::timeout(Duration::from_secs(5), async {
      while service.pending_count() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("queue should drain");
  }

  #[tokio::test]
  async fn test_offline_write_syncs_on_unmetered_reconnect() {
    let transport = Arc::new(FakeTransport::succeeding());
    let service = service_with(Arc::new(MemoryStore::new()), transport.clone());
    service.start();

    service.handle_connectivity(false, "none");
    assert!(service.is_offline());

    let outcome = service
      .mutate_or_enqueue(
        OperationKind::Update,
        "/recipes/42",
        Some(json!({"nombre": "Torta"})),
      )
      .await
      .unwrap();
    assert!(matches!(outcome, MutationOutcome::Queued(_)));
    assert_eq!(service.pending_count(), 1);
    // Nothing was attempted while offline
    assert!(transport.calls().is_empty());

    service.handle_connectivity(true, "wifi");
    wait_until_drained(&service).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, reqwest::Method::PUT);
    assert_eq!(calls[0].1, "/recipes/42");
    assert_eq!(calls[0].2, Some(json!({"nombre": "Torta"})));

    service.shutdown().await;
  }

  #[tokio::test]
  async fn test_metered_reconnect_does_not_auto_sync() {
    let transport = Arc::new(FakeTransport::succeeding());
    let service = service_with(Arc::new(MemoryStore::new()), transport.clone());
    service.start();

    service
      .queue()
      .enqueue(OperationKind::Create, "/comments", Some(json!({"texto": "Rica"})))
      .unwrap();
    service.handle_connectivity(true, "cellular");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(service.pending_count(), 1);
    assert!(transport.calls().is_empty());

    // Manual sync still works on a metered link
    let report = service.sync_now().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(service.pending_count(), 0);

    service.shutdown().await;
  }

  #[tokio::test]
  async fn test_failed_online_mutation_is_queued() {
    let transport = Arc::new(FakeTransport::succeeding());
    transport.fail_endpoint("/courses/7/enroll");
    let service = service_with(Arc::new(MemoryStore::new()), transport.clone());
    service.handle_connectivity(true, "wifi");

    let outcome = service
      .mutate_or_enqueue(OperationKind::Create, "/courses/7/enroll", None)
      .await
      .unwrap();
    let MutationOutcome::Queued(op) = outcome else {
      panic!("expected the enrollment to be queued");
    };
    assert_eq!(op.retry_count, 0);

    transport.heal_endpoint("/courses/7/enroll");
    service.sync_now().await;
    assert_eq!(service.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_online_mutation_is_sent() {
    let transport = Arc::new(FakeTransport::succeeding());
    let service = service_with(Arc::new(MemoryStore::new()), transport);
    service.handle_connectivity(true, "ethernet");

    let outcome = service
      .mutate_or_enqueue(OperationKind::Delete, "/recipes/5", None)
      .await
      .unwrap();

    assert_eq!(outcome, MutationOutcome::Sent(Some(json!({"ok": true}))));
    assert_eq!(service.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_cache_fallback_when_offline_and_fetch_fails() {
    let transport = Arc::new(FakeTransport::succeeding());
    let service = service_with(Arc::new(MemoryStore::new()), transport);
    let populares = json!([{"id": 1, "nombre": "Tarta"}]);

    service
      .cache()
      .put("recetas_populares", populares.clone(), 2.0)
      .unwrap();
    assert_eq!(service.cache().get("recetas_populares"), Some(populares.clone()));

    // Online but the live fetch fails
    service.handle_connectivity(true, "wifi");
    let result: CacheResult<Value> = service
      .fetch_fresh("recetas_populares", None, || async {
        Err(eyre!("connection reset"))
      })
      .await
      .unwrap();
    assert_eq!(result.data, populares);
    assert_eq!(result.source, crate::cache::CacheSource::Offline);

    // Offline: the fetcher is not even called
    service.handle_connectivity(false, "none");
    let result: CacheResult<Value> = service
      .fetch_fresh("recetas_populares", None, || async {
        panic!("must not fetch while offline")
      })
      .await
      .unwrap();
    assert_eq!(result.data, populares);
  }

  #[tokio::test]
  async fn test_fetch_fresh_without_cache_returns_error() {
    let service = service_with(
      Arc::new(MemoryStore::new()),
      Arc::new(FakeTransport::succeeding()),
    );
    service.handle_connectivity(true, "wifi");

    let result: Result<CacheResult<Value>> = service
      .fetch_fresh("cursos", None, || async { Err(eyre!("timeout")) })
      .await;
    assert!(result.is_err());

    service.handle_connectivity(false, "none");
    let result: Result<CacheResult<Value>> = service
      .fetch_fresh("cursos", None, || async { Ok(json!([])) })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_fetch_cached_serves_live_entry_then_refetches_after_expiry() {
    let clock = ManualClock::new();
    let service = OfflineService::new(
      Arc::new(MemoryStore::new()),
      Arc::new(FakeTransport::succeeding()),
      clock.clone(),
      LinkClassifier::default(),
    );
    service.init();
    service.handle_connectivity(true, "wifi");

    let first: CacheResult<Vec<String>> = service
      .fetch_cached("cursos", Some(1.0), || async { Ok(vec!["Pasteleria".to_string()]) })
      .await
      .unwrap();
    assert_eq!(first.source, crate::cache::CacheSource::Network);

    let second: CacheResult<Vec<String>> = service
      .fetch_cached("cursos", Some(1.0), || async { panic!("should be cached") })
      .await
      .unwrap();
    assert_eq!(second.source, crate::cache::CacheSource::Cache);
    assert_eq!(second.data, vec!["Pasteleria".to_string()]);

    clock.advance(TimeDelta::hours(1));
    let third: CacheResult<Vec<String>> = service
      .fetch_cached("cursos", Some(1.0), || async { Ok(vec!["Panaderia".to_string()]) })
      .await
      .unwrap();
    assert_eq!(third.source, crate::cache::CacheSource::Network);
    assert_eq!(third.data, vec!["Panaderia".to_string()]);
  }

  #[tokio::test]
  async fn test_metered_link_policy() {
    let service = service_with(
      Arc::new(MemoryStore::new()),
      Arc::new(FakeTransport::succeeding()),
    );
    service.handle_connectivity(true, "cellular");

    assert!(service.should_warn_before_metered_use());
    assert!(!service.is_offline());
    assert!(!service.should_auto_sync());
  }

  #[tokio::test]
  async fn test_state_survives_restart() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    {
      let service = service_with(store.clone(), Arc::new(FakeTransport::succeeding()));
      service.cache().put("perfil", json!({"nombre": "Ana"}), 24.0).unwrap();
      service
        .queue()
        .enqueue(OperationKind::Create, "/payments", Some(json!({"monto": 100})))
        .unwrap();
    }

    let service = OfflineService::new(
      store,
      Arc::new(FakeTransport::succeeding()),
      ManualClock::new(),
      LinkClassifier::default(),
    );
    let summary = service.init();

    assert_eq!(
      summary,
      InitSummary {
        cached_entries: 1,
        pending_operations: 1,
      }
    );
    assert_eq!(service.cache().get("perfil"), Some(json!({"nombre": "Ana"})));
    assert_eq!(service.queue().list()[0].endpoint, "/payments");
  }

  #[tokio::test]
  async fn test_on_resume_sweeps_and_syncs() {
    let clock = ManualClock::new();
    let service = OfflineService::new(
      Arc::new(MemoryStore::new()),
      Arc::new(FakeTransport::succeeding()),
      clock.clone(),
      LinkClassifier::default(),
    );
    service.init();

    service.cache().put("old", json!(1), 1.0).unwrap();
    service.queue().enqueue(OperationKind::Create, "/ratings", None).unwrap();
    clock.advance(TimeDelta::hours(2));

    // Offline: sweep only
    assert!(service.on_resume().await.is_none());
    assert!(service.cache().is_empty());
    assert_eq!(service.pending_count(), 1);

    service.handle_connectivity(true, "wifi");
    let report = service.on_resume().await.unwrap();
    assert_eq!(report.succeeded, 1);
  }

  #[tokio::test]
  async fn test_start_twice_and_shutdown() {
    let service = service_with(
      Arc::new(MemoryStore::new()),
      Arc::new(FakeTransport::succeeding()),
    );
    service.start();
    service.start();
    assert_eq!(service.monitor().subscriber_count(), 1);

    service.shutdown().await;
    assert_eq!(service.monitor().subscriber_count(), 0);
  }

  #[tokio::test]
  async fn test_restart_after_shutdown_still_syncs() {
    let transport = Arc::new(FakeTransport::succeeding());
    let service = service_with(Arc::new(MemoryStore::new()), transport.clone());
    service.start();
    service.shutdown().await;
    service.start();
    assert_eq!(service.monitor().subscriber_count(), 1);

    service.queue().enqueue(OperationKind::Create, "/recipes", None).unwrap();
    service.handle_connectivity(true, "wifi");
    wait_until_drained(&service).await;
    assert_eq!(transport.calls().len(), 1);

    service.queue().enqueue(OperationKind::Create, "/ratings", None).unwrap();
    let report = service.sync_now().await;
    assert!(!report.cancelled);
    assert_eq!(report.succeeded, 1);

    service.shutdown().await;

    // Stopped services still honour a manual sync
    service.queue().enqueue(OperationKind::Delete, "/ratings/1", None).unwrap();
    let report = service.sync_now().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(service.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_start_on_unmetered_link_drains_reloaded_work() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    {
      let service = service_with(store.clone(), Arc::new(FakeTransport::succeeding()));
      service
        .queue()
        .enqueue(OperationKind::Update, "/profile", Some(json!({"nombre": "Ana"})))
        .unwrap();
    }

    let transport = Arc::new(FakeTransport::succeeding());
    let service = service_with(store, transport.clone());
    assert_eq!(service.pending_count(), 1);
    service.handle_connectivity(true, "wifi");
    service.start();

    wait_until_drained(&service).await;
    assert_eq!(transport.calls()[0].1, "/profile");

    service.shutdown().await;
  }
}
