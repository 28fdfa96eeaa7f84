//! Inbound message schema validation
//!
//! Messages that fail validation are dropped before dispatch; they never count
//! as channel errors.

use alloc::sync::Arc;
use serde_json::Value;

use crate::errors::ValidationError;
use crate::message::{Message, MessageType};
use crate::types::{AgentId, SystemTimeSource, TimeSource};

/// Default payload limit, measured on the JSON encoding
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;
/// Default tolerance for timestamps ahead of the local clock
pub const DEFAULT_MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;
/// Longest accepted custom message type name
pub const MAX_CUSTOM_TYPE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    pub max_payload_bytes: usize,
    pub max_clock_skew_ms: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_clock_skew_ms: DEFAULT_MAX_CLOCK_SKEW_MS,
        }
    }
}

/// Checks message shape against per-type rules
pub struct MessageValidator {
    config: ValidationConfig,
    time_source: Arc<dyn TimeSource>,
}

impl MessageValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(config: ValidationConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            time_source,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(&self, message: &Message) -> Result<(), ValidationError> {
        AgentId::check(message.sender_id.as_str())?;
        if let Some(recipient) = &message.recipient_id {
            AgentId::check(recipient.as_str())?;
        }
        self.check_timestamp(message)?;
        self.check_payload_size(message)?;
        check_type_rules(&message.message_type, &message.payload)
    }

    fn check_timestamp(&self, message: &Message) -> Result<(), ValidationError> {
        let stamped = message.timestamp.as_millis();
        if stamped == 0 {
            return Err(ValidationError::MissingTimestamp);
        }
        let now = self.time_source.now().as_millis();
        let skew_ms = stamped.saturating_sub(now);
        if skew_ms > self.config.max_clock_skew_ms {
            return Err(ValidationError::TimestampInFuture {
                skew_ms,
                max_skew_ms: self.config.max_clock_skew_ms,
            });
        }
        Ok(())
    }

    fn check_payload_size(&self, message: &Message) -> Result<(), ValidationError> {
        let size = serde_json::to_vec(&message.payload)
            .map_err(|e| ValidationError::InvalidPayload {
                message_type: message.message_type.to_string(),
                reason: e.to_string(),
            })?
            .len();
        if size > self.config.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                max: self.config.max_payload_bytes,
            });
        }
        Ok(())
    }
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl core::fmt::Debug for MessageValidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Per-type Rules
// ----------------------------------------------------------------------------

fn check_type_rules(message_type: &MessageType, payload: &Value) -> Result<(), ValidationError> {
    match message_type {
        MessageType::TaskAssignment => require_string_fields(message_type, payload, &["task_id"]),
        MessageType::TaskStatus => {
            require_string_fields(message_type, payload, &["task_id", "status"])
        }
        MessageType::Command => require_string_fields(message_type, payload, &["command"]),
        MessageType::SyncRequest | MessageType::SyncResponse => {
            require_object(message_type, payload).map(|_| ())
        }
        MessageType::Presence => Ok(()),
        MessageType::Custom(name) => check_custom_name(name),
    }
}

fn require_object<'a>(
    message_type: &MessageType,
    payload: &'a Value,
) -> Result<&'a serde_json::Map<String, Value>, ValidationError> {
    payload
        .as_object()
        .ok_or_else(|| ValidationError::InvalidPayload {
            message_type: message_type.to_string(),
            reason: "payload must be a JSON object".to_string(),
        })
}

fn require_string_fields(
    message_type: &MessageType,
    payload: &Value,
    fields: &[&'static str],
) -> Result<(), ValidationError> {
    let object = require_object(message_type, payload)?;
    for &field in fields {
        match object.get(field) {
            Some(Value::String(value)) if !value.is_empty() => {}
            Some(_) => {
                return Err(ValidationError::InvalidPayload {
                    message_type: message_type.to_string(),
                    reason: format!("field {:?} must be a non-empty string", field),
                })
            }
            None => {
                return Err(ValidationError::MissingField {
                    message_type: message_type.to_string(),
                    field,
                })
            }
        }
    }
    Ok(())
}

fn check_custom_name(name: &str) -> Result<(), ValidationError> {
    let well_formed = !name.is_empty()
        && name.len() <= MAX_CUSTOM_TYPE_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::InvalidCustomType {
            name: name.to_string(),
        })
    }
}
