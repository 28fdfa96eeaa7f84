//! agentwire Core
//!
//! Transport-agnostic building blocks for agent coordination channels: identifiers
//! and messages, configuration, the connection state machine, reconnect backoff,
//! message signing and validation, and the contract every transport driver
//! implements. The tokio-driven channel itself lives in `agentwire-runtime`.

extern crate alloc;

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod auth;
pub mod config;
pub mod errors;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod types;
pub mod validation;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use auth::MessageSigner;
pub use config::{AuthToken, ChannelConfig, ConnectionParams, HeartbeatPolicy, RetryPolicy};
pub use errors::{
    AuthError, ChannelError, ChannelResult, ConfigError, Result, TransportError, ValidationError,
};
pub use message::{Envelope, Message, MessageId, MessageType};
pub use protocol::{
    BackoffPolicy, ConnectionStateMachine, ConnectionStatus, StateChange, StateTransitionError,
};
pub use transport::{DriverEvent, DriverEventReceiver, DriverEventSender, TransportDriver};
pub use types::{AgentId, ChannelId, SystemTimeSource, TimeSource, Timestamp, TransportType};
pub use validation::{MessageValidator, ValidationConfig};
