//! Connectivity snapshot and link-type normalization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cost class of the active link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkClass {
  /// Wi-Fi-like, assumed free of data cost
  Unmetered,
  /// Cellular-like, bandwidth costs the user
  Metered,
  /// Undetermined; never treated as free bandwidth
  Unknown,
}

/// Last known reachability, replaced wholesale on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
  pub connected: bool,
  pub link_class: LinkClass,
  /// Link type as reported by the host, for diagnostics only
  pub raw_type: String,
}

impl Default for ConnectivityState {
  /// Offline until the first event says otherwise.
  fn default() -> Self {
    Self {
      connected: false,
      link_class: LinkClass::Unknown,
      raw_type: "unknown".to_string(),
    }
  }
}

/// Maps host-reported link type names onto [`LinkClass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClassifier {
  unmetered: BTreeSet<String>,
  metered: BTreeSet<String>,
}

impl LinkClassifier {
  pub fn new<I, J, S, T>(unmetered: I, metered: J) -> Self
  where
    I: IntoIterator<Item = S>,
    J: IntoIterator<Item = T>,
    S: AsRef<str>,
    T: AsRef<str>,
  {
    Self {
      unmetered: unmetered.into_iter().map(|s| normalize(s.as_ref())).collect(),
      metered: metered.into_iter().map(|s| normalize(s.as_ref())).collect(),
    }
  }

  pub fn classify(&self, raw_type: &str) -> LinkClass {
    let raw = normalize(raw_type);
    if self.unmetered.contains(&raw) {
      LinkClass::Unmetered
    } else if self.metered.contains(&raw) {
      LinkClass::Metered
    } else {
      LinkClass::Unknown
    }
  }

  /// Build the snapshot for a raw host event.
  pub fn state_for(&self, connected: bool, raw_type: &str) -> ConnectivityState {
    ConnectivityState {
      connected,
      link_class: self.classify(raw_type),
      raw_type: raw_type.to_string(),
    }
  }
}

impl Default for LinkClassifier {
  fn default() -> Self {
    Self::new(["wifi", "ethernet", "wimax"], ["cellular", "bluetooth"])
  }
}

fn normalize(s: &str) -> String {
  s.trim().to_lowercase()
}
