//! Core types for agentwire
//!
//! Newtype identifiers, timestamps and the transport tag shared by every crate
//! in the workspace.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ValidationError;

// ----------------------------------------------------------------------------
// Channel Identifier
// ----------------------------------------------------------------------------

/// Process-unique identifier of one logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Generate a fresh random channel id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

// ----------------------------------------------------------------------------
// Agent Identifier
// ----------------------------------------------------------------------------

/// Maximum length of an agent identifier in bytes
pub const MAX_AGENT_ID_LEN: usize = 128;

/// Identifier of an agent participating in a channel
///
/// Agent ids are short ASCII names (`planner`, `worker-3`, `build.agent:7`).
/// Allowed characters are ASCII alphanumerics plus `-`, `_`, `.` and `:`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create an agent id, validating its syntax
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        Self::check(&id)?;
        Ok(Self(id))
    }

    /// Check whether a raw string is a well-formed agent id
    pub fn check(id: &str) -> Result<(), ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::InvalidAgentId {
                id: id.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if id.len() > MAX_AGENT_ID_LEN {
            return Err(ValidationError::InvalidAgentId {
                id: id.chars().take(32).collect(),
                reason: format!("longer than {} bytes", MAX_AGENT_ID_LEN),
            });
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(ValidationError::InvalidAgentId {
                id: id.to_string(),
                reason: format!("invalid character {:?}", bad),
            });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Abstraction over wall-clock time so validation can be tested deterministically
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Transport Type
// ----------------------------------------------------------------------------

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Pub/sub message broker
    PubSub,
    /// Chat platform bot connection
    Chat,
    /// Real-time hub (websocket style)
    Hub,
    /// In-process hub, for tests and local runs
    Local,
}

impl TransportType {
    /// Whether the transport authenticates participants itself
    ///
    /// Transports without native access control get signed envelopes.
    pub fn has_native_access_control(&self) -> bool {
        matches!(self, TransportType::Chat)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::PubSub => "pubsub",
            TransportType::Chat => "chat",
            TransportType::Hub => "hub",
            TransportType::Local => "local",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
