//! Decisions the UI derives from connectivity and queue state.
//!
//! All functions are pure projections of a [`ConnectivityState`] snapshot;
//! being offline dominates whatever the link class says.

use serde::Serialize;

use crate::connectivity::{ConnectivityState, LinkClass};

/// Warn before using a metered link.
pub fn should_warn_before_metered_use(state: &ConnectivityState) -> bool {
  state.connected && state.link_class == LinkClass::Metered
}

pub fn is_offline(state: &ConnectivityState) -> bool {
  !state.connected
}

/// Background sync is allowed without asking.
pub fn should_auto_sync(state: &ConnectivityState) -> bool {
  state.connected && state.link_class == LinkClass::Unmetered
}

/// Everything the UI needs for badges and banners in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
  pub offline: bool,
  pub warn_before_metered_use: bool,
  pub auto_sync: bool,
  pub pending_count: usize,
}

impl PolicySnapshot {
  pub fn new(state: &ConnectivityState, pending_count: usize) -> Self {
    Self {
      offline: is_offline(state),
      warn_before_metered_use: should_warn_before_metered_use(state),
      auto_sync: should_auto_sync(state),
      pending_count,
    }
  }
}
