//! Network reachability tracking.
//!
//! The host runtime (or [`ReachabilityProbe`]) reports raw `(connected, type)`
//! events; [`ConnectivityMonitor`] normalizes them into a
//! [`ConnectivityState`] snapshot and fans them out to subscribers.

mod monitor;
mod probe;
mod state;

pub use monitor::{ConnectivityMonitor, Subscription};
pub use probe::ReachabilityProbe;
pub use state::{ConnectivityState, LinkClass, LinkClassifier};
