//! Coordination messages and their wire envelope

use alloc::borrow::Cow;
use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentId, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Message Type
// ----------------------------------------------------------------------------

/// Kind of coordination message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A task handed to one or more agents
    TaskAssignment,
    /// Progress or completion report for a task
    TaskStatus,
    /// Parsed operator command relayed to agents
    Command,
    /// Request for a peer's view of shared state
    SyncRequest,
    /// Answer to a sync request
    SyncResponse,
    /// Agent availability announcement
    Presence,
    /// Application-defined message kind
    Custom(String),
}

impl MessageType {
    /// Stable textual tag, used in signatures and logs
    pub fn as_tag(&self) -> Cow<'_, str> {
        match self {
            MessageType::TaskAssignment => Cow::Borrowed("task_assignment"),
            MessageType::TaskStatus => Cow::Borrowed("task_status"),
            MessageType::Command => Cow::Borrowed("command"),
            MessageType::SyncRequest => Cow::Borrowed("sync_request"),
            MessageType::SyncResponse => Cow::Borrowed("sync_response"),
            MessageType::Presence => Cow::Borrowed("presence"),
            MessageType::Custom(name) => Cow::Owned(format!("custom:{}", name)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_tag())
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A coordination message exchanged between agents
///
/// A message without `recipient_id` is a broadcast; with one it is unicast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<AgentId>,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    /// Create a broadcast message stamped with the current time
    pub fn broadcast(
        sender_id: AgentId,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            recipient_id: None,
            message_type,
            timestamp: Timestamp::now(),
            payload,
        }
    }

    /// Create a unicast message stamped with the current time
    pub fn direct(
        sender_id: AgentId,
        recipient_id: AgentId,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            recipient_id: Some(recipient_id),
            ..Self::broadcast(sender_id, message_type, payload)
        }
    }

    /// Re-stamp the message using an explicit time source
    pub fn with_time_source(mut self, time_source: &dyn TimeSource) -> Self {
        self.timestamp = time_source.now();
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Wire frame carried by every transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,
    /// Hex HMAC over the message header, for transports without access control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    pub fn unsigned(message: Message) -> Self {
        Self {
            message,
            signature: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}
