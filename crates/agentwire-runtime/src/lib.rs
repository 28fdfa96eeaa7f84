//! agentwire Runtime
//!
//! The tokio-driven side of agentwire:
//! - `Channel`: lifecycle facade over one transport driver (connect, reconnect
//!   with backoff, heartbeats, handler dispatch, routing, statistics)
//! - `ChannelManager`: a registry of channels driven as a group
//! - `HandlerRegistry`: isolated subscriber dispatch
//!
//! `agentwire-core` provides the types and the driver contract this crate
//! builds on.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod channel;
pub mod handlers;
pub mod heartbeat;
mod ingress;
pub mod manager;
pub mod router;
pub mod stats;

pub use channel::{Channel, ChannelBuilder};
pub use handlers::{
    ErrorEvent, ErrorKind, HandlerError, HandlerId, HandlerRegistry, HandlerResult,
    StateChangeEvent,
};
pub use heartbeat::probe_with_timeout;
pub use manager::ChannelManager;
pub use router::Route;
pub use stats::{ChannelStats, StatsSnapshot};

// Re-export core types for convenience
pub use agentwire_core::{
    AgentId, ChannelConfig, ChannelError, ChannelId, ChannelResult, ConnectionParams,
    ConnectionStatus, HeartbeatPolicy, Message, MessageType, RetryPolicy, TransportDriver,
    TransportType,
};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it
///
/// Handler panics are caught, so poisoning only ever follows a bug; the
/// guarded data stays consistent because no section leaves it half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
