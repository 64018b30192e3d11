//! TTL-bounded JSON cache with durable persistence and offline fallback.
//!
//! This module provides:
//! - Payloads keyed by a logical name with a caller-supplied TTL (in hours)
//! - Lazy expiry: entries are checked (and evicted) when read
//! - Whole-map persistence after every mutation, reloaded at startup
//! - Source tagging so callers know whether data came from network or cache

mod data_cache;
mod traits;

pub use data_cache::{CacheEntry, DataCache};
pub use traits::{CacheResult, CacheSource};
