//! Durable key-value cache with per-entry expiry.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{OfflineError, OfflineResult};
use crate::store::{DurableStore, CACHE_STORE};

/// A single cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub key: String,
  pub payload: Value,
  pub stored_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  /// An entry is logically absent once `now` reaches `expires_at`.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

type EntryMap = BTreeMap<String, CacheEntry>;

/// JSON cache keyed by logical name.
///
/// The in-memory map is authoritative for the current process; the durable
/// store gets the whole map after every mutation.
pub struct DataCache {
  entries: Mutex<EntryMap>,
  store: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
}

impl DataCache {
  /// Create an empty cache. Call [`DataCache::init`] to load persisted entries.
  pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(EntryMap::new()),
      store,
      clock,
    }
  }

  /// Load persisted entries, replacing the in-memory map.
  ///
  /// A missing, unreadable or corrupt store yields an empty cache. Returns
  /// the number of entries loaded.
  pub fn init(&self) -> usize {
    let loaded = match self.store.load(CACHE_STORE) {
      Ok(Some(doc)) => match serde_json::from_value::<EntryMap>(doc) {
        Ok(map) => map,
        Err(e) => {
          warn!(error = %e, "Cached data is corrupt, starting with an empty cache");
          EntryMap::new()
        }
      },
      Ok(None) => EntryMap::new(),
      Err(e) => {
        warn!(error = %e, "Failed to load cached data, starting with an empty cache");
        EntryMap::new()
      }
    };

    let count = loaded.len();
    *self.lock() = loaded;
    debug!(count, "Cache loaded");
    count
  }

  /// Store `payload` under `key` for `ttl_hours`, replacing any previous entry.
  pub fn put(&self, key: &str, payload: Value, ttl_hours: f64) -> OfflineResult<()> {
    let ttl = ttl_from_hours(ttl_hours)?;
    let stored_at = self.clock.now();
    let expires_at = stored_at
      .checked_add_signed(ttl)
      .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let mut entries = self.lock();
    entries.insert(
      key.to_string(),
      CacheEntry {
        key: key.to_string(),
        payload,
        stored_at,
        expires_at,
      },
    );
    debug!(key, %expires_at, "Cache entry stored");
    self.persist(&entries)
  }

  /// Get the payload for `key` if present and unexpired.
  pub fn get(&self, key: &str) -> Option<Value> {
    self.get_entry(key).map(|entry| entry.payload)
  }

  /// Get the full entry for `key` if present and unexpired.
  ///
  /// An expired entry is evicted (and the map persisted) before returning.
  pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let now = self.clock.now();
    let mut entries = self.lock();

    match entries.get(key) {
      None => return None,
      Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
      Some(_) => {}
    }

    entries.remove(key);
    debug!(key, "Cache entry expired");
    if let Err(e) = self.persist(&entries) {
      warn!(key, error = %e, "Failed to persist cache after expiry");
    }
    None
  }

  /// Explicitly evict `key`. Returns whether an entry was removed.
  pub fn remove(&self, key: &str) -> OfflineResult<bool> {
    let mut entries = self.lock();
    if entries.remove(key).is_none() {
      return Ok(false);
    }
    self.persist(&entries)?;
    Ok(true)
  }

  /// Remove every expired entry and return how many were removed.
  pub fn evict_expired(&self) -> OfflineResult<usize> {
    let now = self.clock.now();
    let mut entries = self.lock();

    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before - entries.len();

    if removed > 0 {
      debug!(removed, "Evicted expired cache entries");
      self.persist(&entries)?;
    }
    Ok(removed)
  }

  /// Number of entries physically present (expired ones included until swept).
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> MutexGuard<'_, EntryMap> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn persist(&self, entries: &EntryMap) -> OfflineResult<()> {
    let doc =
      serde_json::to_value(entries).map_err(|e| OfflineError::storage(CACHE_STORE, e))?;
    self
      .store
      .save(CACHE_STORE, &doc)
      .map_err(|e| OfflineError::storage(CACHE_STORE, e))
  }
}

/// Convert a TTL in hours to a positive duration, rejecting bad input.
fn ttl_from_hours(ttl_hours: f64) -> OfflineResult<TimeDelta> {
  if !ttl_hours.is_finite() || ttl_hours <= 0.0 {
    return Err(OfflineError::InvalidTtl(ttl_hours));
  }

  // Sub-millisecond TTLs still have to expire strictly after they are stored.
  let millis = (ttl_hours * 3_600_000.0).ceil().max(1.0) as i64;
  Ok(TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::MAX))
}
