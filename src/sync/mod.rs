//! Replay of queued operations.
//!
//! ```text
//! ┌──────────────┐  trigger  ┌──────────────┐  replay   ┌─────────────┐
//! │ Connectivity │──────────►│ Synchronizer │──────────►│  Transport  │
//! │   Monitor    │           │   (drain)    │◄──────────│   (trait)   │
//! └──────────────┘           └──────────────┘  ok/err   └─────────────┘
//!                                   │
//!                                   ▼
//!                            ┌──────────────┐
//!                            │ PendingQueue │  remove / increment_retry
//!                            └──────────────┘
//! ```

mod synchronizer;
mod transport;

pub use synchronizer::{
  auto_sync_on_reconnect, spawn_trigger_loop, DrainReport, SyncTrigger, Synchronizer,
};
pub use transport::{HttpTransport, Transport, TransportError, TransportResult};
