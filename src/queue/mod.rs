//! Durable queue of operations that have not been confirmed by the server.
//!
//! Entries are kept in insertion order, persisted as a whole after every
//! mutation and reloaded at startup. Only the synchronizer removes entries
//! or bumps their retry counters.

mod operation;
mod pending;

pub use operation::{OperationKind, PendingOperation};
pub use pending::PendingQueue;

/// Replay attempts before an entry is left alone.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
