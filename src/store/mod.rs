//! Durable key-value storage backing the cache and the pending queue.
//!
//! Each consumer owns one named store and reads/writes it as a single JSON
//! document. Backends only need whole-document load and save.

mod memory;
mod sqlite;

use color_eyre::Result;
use serde_json::Value;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store name used by the data cache.
pub const CACHE_STORE: &str = "cachedData";

/// Store name used by the pending operation queue.
pub const QUEUE_STORE: &str = "pendingSync";

/// Trait for durable storage backends.
pub trait DurableStore: Send + Sync {
  /// Load the document saved under `name`, if any.
  fn load(&self, name: &str) -> Result<Option<Value>>;

  /// Replace the document saved under `name`.
  fn save(&self, name: &str, value: &Value) -> Result<()>;
}
