//! Offline-resilience layer for the recipe marketplace client.
//!
//! The UI talks to a single [`OfflineService`] which owns:
//! - a connectivity monitor (current link snapshot + transition events)
//! - a TTL-bounded JSON cache persisted to durable storage
//! - a durable queue of operations that have not reached the server yet
//! - a synchronizer that replays the queue when an unmetered link comes back

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod policy;
pub mod queue;
pub mod service;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use error::{OfflineError, OfflineResult};
pub use service::OfflineService;
