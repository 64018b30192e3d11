//! Connectivity monitor: snapshot plus subscriber fan-out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

use super::state::{ConnectivityState, LinkClassifier};

type Callback = Arc<dyn Fn(&ConnectivityState) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
  next_id: u64,
  callbacks: Vec<(u64, Callback)>,
}

type SharedSubscribers = Arc<Mutex<Subscribers>>;

fn lock_subscribers(subs: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
  subs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks the current link state and notifies subscribers of every change.
///
/// The monitor is the only writer of the snapshot. It never fails: link
/// types it cannot classify degrade to [`LinkClass::Unknown`](super::LinkClass::Unknown).
pub struct ConnectivityMonitor {
  state: Mutex<ConnectivityState>,
  classifier: LinkClassifier,
  subscribers: SharedSubscribers,
}

impl ConnectivityMonitor {
  pub fn new(classifier: LinkClassifier) -> Self {
    Self {
      state: Mutex::new(ConnectivityState::default()),
      classifier,
      subscribers: Arc::new(Mutex::new(Subscribers::default())),
    }
  }

  /// Last known snapshot (offline before the first event).
  pub fn current(&self) -> ConnectivityState {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Register `callback` for every subsequent event.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&ConnectivityState) + Send + Sync + 'static,
  {
    let mut subs = lock_subscribers(&self.subscribers);
    let id = subs.next_id;
    subs.next_id += 1;
    subs.callbacks.push((id, Arc::new(callback)));

    Subscription {
      id,
      subscribers: Arc::downgrade(&self.subscribers),
    }
  }

  /// Number of live subscriptions.
  pub fn subscriber_count(&self) -> usize {
    lock_subscribers(&self.subscribers).callbacks.len()
  }

  /// Feed a raw host event into the monitor.
  ///
  /// Callbacks run on the caller's task, in subscription order, after the
  /// snapshot has been replaced. They must not call `handle_event` themselves.
  pub fn handle_event(&self, connected: bool, raw_type: &str) -> ConnectivityState {
    let next = self.classifier.state_for(connected, raw_type);

    {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      if *state != next {
        debug!(
          connected = next.connected,
          link_class = ?next.link_class,
          raw_type = %next.raw_type,
          "Connectivity changed"
        );
      }
      *state = next.clone();
    }

    // Call outside the lock so callbacks may subscribe/unsubscribe
    let callbacks: Vec<Callback> = lock_subscribers(&self.subscribers)
      .callbacks
      .iter()
      .map(|(_, cb)| Arc::clone(cb))
      .collect();

    for callback in callbacks {
      callback(&next);
    }

    next
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(LinkClassifier::default())
  }
}

/// Handle for a registered connectivity callback.
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
  id: u64,
  subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
  /// Remove the callback. Safe to call more than once.
  pub fn unsubscribe(&self) {
    if let Some(subs) = self.subscribers.upgrade() {
      lock_subscribers(&subs).callbacks.retain(|(id, _)| *id != self.id);
    }
  }
}
