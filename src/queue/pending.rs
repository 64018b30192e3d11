//! Pending operation queue with whole-list persistence.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::operation::{OperationKind, PendingOperation};
use crate::clock::Clock;
use crate::error::{OfflineError, OfflineResult};
use crate::store::{DurableStore, QUEUE_STORE};

/// Ordered, durable list of operations awaiting replay.
///
/// Entries are never reordered and only leave the queue through
/// [`PendingQueue::remove`].
pub struct PendingQueue {
  ops: Mutex<Vec<PendingOperation>>,
  store: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
  /// Disambiguates ids created within the same millisecond
  seq: AtomicU64,
}

impl PendingQueue {
  /// Create an empty queue. Call [`PendingQueue::init`] to load persisted entries.
  pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      ops: Mutex::new(Vec::new()),
      store,
      clock,
      seq: AtomicU64::new(0),
    }
  }

  /// Load the persisted queue, replacing the in-memory list.
  ///
  /// A missing, unreadable or corrupt store yields an empty queue. Returns
  /// the number of entries loaded.
  pub fn init(&self) -> usize {
    let loaded = match self.store.load(QUEUE_STORE) {
      Ok(Some(doc)) => match serde_json::from_value::<Vec<PendingOperation>>(doc) {
        Ok(ops) => ops,
        Err(e) => {
          warn!(error = %e, "Pending queue is corrupt, starting empty");
          Vec::new()
        }
      },
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(error = %e, "Failed to load pending queue, starting empty");
        Vec::new()
      }
    };

    let count = loaded.len();
    let next_seq = loaded
      .iter()
      .filter_map(|op| id_sequence(&op.id))
      .max()
      .map_or(0, |max| max.saturating_add(1));
    self.seq.store(next_seq, Ordering::Relaxed);
    *self.lock() = loaded;
    debug!(count, "Pending queue loaded");
    count
  }

  /// Append a new operation with a zero retry count.
  ///
  /// The entry is queued even if persisting fails; the error only reports
  /// that it is not durable yet.
  pub fn enqueue(
    &self,
    kind: OperationKind,
    endpoint: &str,
    body: Option<Value>,
  ) -> OfflineResult<PendingOperation> {
    let enqueued_at = self.clock.now();
    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
    let op = PendingOperation {
      id: format!("{:013}-{:06}", enqueued_at.timestamp_millis(), seq),
      kind,
      endpoint: endpoint.to_string(),
      body,
      enqueued_at,
      retry_count: 0,
    };

    let mut ops = self.lock();
    ops.push(op.clone());
    debug!(op_id = %op.id, %kind, endpoint, "Operation queued");
    self.persist(&ops)?;
    Ok(op)
  }

  /// Snapshot of the queue, oldest first.
  pub fn list(&self) -> Vec<PendingOperation> {
    self.lock().clone()
  }

  /// Remove the entry with `id`. Removing an unknown id is a no-op.
  pub fn remove(&self, id: &str) -> OfflineResult<()> {
    let mut ops = self.lock();
    let Some(pos) = ops.iter().position(|op| op.id == id) else {
      return Ok(());
    };

    ops.remove(pos);
    debug!(op_id = id, "Operation removed");
    self.persist(&ops)
  }

  /// Bump the retry counter of `id` and return the updated entry.
  ///
  /// Returns `Ok(None)` if no entry has that id.
  pub fn increment_retry(&self, id: &str) -> OfflineResult<Option<PendingOperation>> {
    let mut ops = self.lock();
    let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
      return Ok(None);
    };

    op.retry_count = op.retry_count.saturating_add(1);
    let updated = op.clone();
    self.persist(&ops)?;
    Ok(Some(updated))
  }

  /// Number of queued entries, exhausted ones included.
  pub fn count(&self) -> usize {
    self.lock().len()
  }

  /// Entries that reached `max_retries` and will not be replayed again.
  pub fn exhausted(&self, max_retries: u32) -> Vec<PendingOperation> {
    self
      .lock()
      .iter()
      .filter(|op| op.is_exhausted(max_retries))
      .cloned()
      .collect()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<PendingOperation>> {
    self.ops.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn persist(&self, ops: &[PendingOperation]) -> OfflineResult<()> {
    let doc = serde_json::to_value(ops).map_err(|e| OfflineError::storage(QUEUE_STORE, e))?;
    self
      .store
      .save(QUEUE_STORE, &doc)
      .map_err(|e| OfflineError::storage(QUEUE_STORE, e))
  }
}

/// Sequence suffix of an id shaped `{millis}-{seq}`.
fn id_sequence(id: &str) -> Option<u64> {
  id.rsplit_once('-')?.1.parse().ok()
}
