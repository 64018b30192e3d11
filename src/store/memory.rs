//! In-process store, used when persistence is disabled.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::DurableStore;

/// Store that keeps documents in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
  docs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl DurableStore for MemoryStore {
  fn load(&self, name: &str) -> Result<Option<Value>> {
    let docs = self
      .docs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(docs.get(name).cloned())
  }

  fn save(&self, name: &str, value: &Value) -> Result<()> {
    let mut docs = self
      .docs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    docs.insert(name.to_string(), value.clone());
    Ok(())
  }
}
