//! Error types for agentwire
//!
//! Each concern gets its own error enum; `ChannelError` unifies them for the
//! public channel API.

use crate::protocol::{ConnectionStatus, StateTransitionError};
use crate::types::TransportType;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Configuration errors, raised while building or loading a channel config
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Authentication token too short: {length} characters (minimum {min})")]
    TokenTooShort { length: usize, min: usize },
    #[error("Invalid connection parameters: {reason}")]
    InvalidConnectionParams { reason: String },
    #[error("Transport type {declared} does not match connection parameters for {actual}")]
    TransportMismatch {
        declared: TransportType,
        actual: TransportType,
    },
    #[error("Invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
    #[error("Invalid heartbeat policy: {reason}")]
    InvalidHeartbeatPolicy { reason: String },
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors reported by transport drivers
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open {transport} connection: {reason}")]
    OpenFailed {
        transport: TransportType,
        reason: String,
    },
    #[error("Connection closed: {reason}")]
    Closed { reason: String },
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Probe failed: {reason}")]
    ProbeFailed { reason: String },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Unknown recipient: {recipient}")]
    UnknownRecipient { recipient: String },
    #[error("Driver is not open")]
    NotOpen,
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
}

/// Message authentication failures
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Envelope is missing its signature")]
    MissingSignature,
    #[error("Signature is not valid hex")]
    MalformedSignature,
    #[error("Signature verification failed")]
    InvalidSignature,
    #[error("Signing key rejected")]
    InvalidKey,
}

/// Message schema validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid agent id {id:?}: {reason}")]
    InvalidAgentId { id: String, reason: String },
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("Message type {message_type} requires field {field:?}")]
    MissingField {
        message_type: String,
        field: &'static str,
    },
    #[error("Invalid payload for {message_type}: {reason}")]
    InvalidPayload {
        message_type: String,
        reason: String,
    },
    #[error("Invalid custom message type {name:?}")]
    InvalidCustomType { name: String },
    #[error("Message timestamp is missing")]
    MissingTimestamp,
    #[error("Message timestamp is {skew_ms}ms in the future (max skew {max_skew_ms}ms)")]
    TimestampInFuture { skew_ms: u64, max_skew_ms: u64 },
}

// ----------------------------------------------------------------------------
// Channel Error
// ----------------------------------------------------------------------------

/// Unified error type for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation requires a connected channel
    #[error("Channel is not connected (status: {status})")]
    NotConnected { status: ConnectionStatus },

    /// Reconnect loop reached the configured maximum
    #[error("Reconnection gave up after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// Heartbeat probe did not answer within the configured timeout
    #[error("Heartbeat probe timed out after {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    /// A disconnect interrupted an in-flight connect
    #[error("Connect cancelled by disconnect")]
    ConnectCancelled,
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl TransportError {
    pub fn open_failed<R: Into<String>>(transport: TransportType, reason: R) -> Self {
        TransportError::OpenFailed {
            transport,
            reason: reason.into(),
        }
    }

    pub fn send_failed<R: Into<String>>(reason: R) -> Self {
        TransportError::SendFailed {
            reason: reason.into(),
        }
    }

    pub fn probe_failed<R: Into<String>>(reason: R) -> Self {
        TransportError::ProbeFailed {
            reason: reason.into(),
        }
    }

    pub fn closed<R: Into<String>>(reason: R) -> Self {
        TransportError::Closed {
            reason: reason.into(),
        }
    }
}

impl ChannelError {
    /// Create a not-connected error for the given status
    pub fn not_connected(status: ConnectionStatus) -> Self {
        ChannelError::NotConnected { status }
    }

    /// Whether the error leaves the channel in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::ReconnectExhausted { .. })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ChannelError>;
pub type ChannelResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ChannelError::from(ConfigError::TokenTooShort { length: 3, min: 16 });
        assert_eq!(
            err.to_string(),
            "Configuration error: Authentication token too short: 3 characters (minimum 16)"
        );

        let err = ChannelError::not_connected(ConnectionStatus::Disconnected);
        assert!(err.to_string().contains("disconnected"));
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_exhaustion_is_terminal() {
        let err = ChannelError::ReconnectExhausted {
            attempts: 5,
            last_error: "refused".to_string(),
        };
        assert!(err.is_terminal());
    }
}
