//! Queue draining with retry accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::Transport;
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::policy;
use crate::queue::{PendingQueue, DEFAULT_MAX_RETRIES};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replays issued
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Entries left alone because they hit the retry cap
  pub skipped_exhausted: usize,
  /// The pass stopped early because its token was cancelled
  pub cancelled: bool,
  /// Another drain was running; this call did nothing
  pub already_running: bool,
}

/// Replays pending operations against their endpoints.
///
/// Only one drain runs at a time; a drain requested while another is in
/// progress returns immediately.
pub struct Synchronizer {
  queue: Arc<PendingQueue>,
  transport: Arc<dyn Transport>,
  max_retries: u32,
  syncing: AtomicBool,
}

/// Clears the syncing flag on every exit path, unwinding included.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl Synchronizer {
  pub fn new(queue: Arc<PendingQueue>, transport: Arc<dyn Transport>) -> Self {
    Self {
      queue,
      transport,
      max_retries: DEFAULT_MAX_RETRIES,
      syncing: AtomicBool::new(false),
    }
  }

  /// Set the number of failed replays after which an entry is left alone.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn max_retries(&self) -> u32 {
    self.max_retries
  }

  /// Whether a drain is in progress.
  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::Acquire)
  }

  /// Replay every eligible entry of the current queue snapshot, in order.
  ///
  /// Successful entries are removed, failed ones get their retry count
  /// bumped, and one failure never stops the pass. `cancel` is checked
  /// before each replay; entries not reached stay untouched.
  pub async fn drain(&self, cancel: &CancellationToken) -> DrainReport {
    if self
      .syncing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("Drain already in progress");
      return DrainReport {
        already_running: true,
        ..DrainReport::default()
      };
    }
    let _guard = SyncingGuard(&self.syncing);

    let snapshot = self.queue.list();
    let mut report = DrainReport::default();

    for op in snapshot {
      if op.is_exhausted(self.max_retries) {
        report.skipped_exhausted += 1;
        continue;
      }

      if cancel.is_cancelled() {
        report.cancelled = true;
        break;
      }

      report.attempted += 1;
      let result = self
        .transport
        .send(op.kind.method(), &op.endpoint, op.body.as_ref())
        .await;

      match result {
        Ok(_) => {
          report.succeeded += 1;
          debug!(op_id = %op.id, endpoint = %op.endpoint, "Replay succeeded");
          if let Err(e) = self.queue.remove(&op.id) {
            warn!(op_id = %op.id, error = %e, "Replayed operation removed but not persisted");
          }
        }
        Err(err) => {
          report.failed += 1;
          match self.queue.increment_retry(&op.id) {
            Ok(Some(updated)) if updated.is_exhausted(self.max_retries) => {
              warn!(
                op_id = %op.id,
                endpoint = %op.endpoint,
                retry_count = updated.retry_count,
                error = %err,
                "Giving up on operation after max retries"
              );
            }
            Ok(Some(updated)) => {
              debug!(
                op_id = %op.id,
                retry_count = updated.retry_count,
                error = %err,
                "Replay failed"
              );
            }
            // Removed by someone else mid-drain
            Ok(None) => {}
            Err(e) => {
              warn!(op_id = %op.id, error = %e, "Retry count bumped but not persisted");
            }
          }
        }
      }
    }

    info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      failed = report.failed,
      skipped_exhausted = report.skipped_exhausted,
      cancelled = report.cancelled,
      remaining = self.queue.count(),
      "Drain finished"
    );
    report
  }
}

/// Sending half of the drain trigger channel.
///
/// Triggers coalesce: while one is pending, further ones are dropped, which
/// is fine because a drain always covers the whole queue.
#[derive(Clone, Debug)]
pub struct SyncTrigger {
  tx: mpsc::Sender<()>,
}

impl SyncTrigger {
  /// Create a trigger and the receiver to pass to [`spawn_trigger_loop`].
  pub fn channel() -> (Self, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (Self { tx }, rx)
  }

  /// Request a drain without waiting for it.
  pub fn fire(&self) {
    let _ = self.tx.try_send(());
  }
}

/// Run a drain every time the trigger fires, until the channel closes or
/// `cancel` fires. The token is also passed to each drain.
pub fn spawn_trigger_loop(
  synchronizer: Arc<Synchronizer>,
  mut rx: mpsc::Receiver<()>,
  cancel: CancellationToken,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        msg = rx.recv() => match msg {
          Some(()) => {
            synchronizer.drain(&cancel).await;
          }
          None => break,
        },
      }
    }
    debug!("Sync trigger loop stopped");
  })
}

/// Fire `trigger` whenever the monitor moves into a connected, unmetered state.
pub fn auto_sync_on_reconnect(monitor: &ConnectivityMonitor, trigger: SyncTrigger) -> Subscription {
  let was_eligible = AtomicBool::new(policy::should_auto_sync(&monitor.current()));

  monitor.subscribe(move |state| {
    let eligible = policy::should_auto_sync(state);
    let before = was_eligible.swap(eligible, Ordering::AcqRel);
    if eligible && !before {
      info!(raw_type = %state.raw_type, "Unmetered link available, triggering sync");
      trigger.fire();
    }
  })
}
