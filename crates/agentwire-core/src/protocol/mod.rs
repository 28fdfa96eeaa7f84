//! Channel Lifecycle Protocol
//!
//! - `connection_state`: lifecycle states, legal transitions and the attempt counter
//! - `backoff`: reconnect delay growth with jitter

pub mod backoff;
pub mod connection_state;

pub use backoff::{BackoffPolicy, MAX_JITTER_FRACTION};
pub use connection_state::{
    ConnectionStateMachine, ConnectionStatus, StateChange, StateTransitionError,
    TRANSITION_HISTORY_LIMIT,
};
