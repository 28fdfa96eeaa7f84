//! Channel Configuration
//!
//! Everything a channel needs before it can be constructed: the authentication
//! token, transport-specific connection parameters, and the retry and heartbeat
//! policies. Configs are immutable once a channel owns them.

use core::fmt;
use core::time::Duration;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ConfigError;
use crate::types::TransportType;

/// Minimum accepted length of an authentication token, in characters
pub const MIN_TOKEN_LENGTH: usize = 16;

// ----------------------------------------------------------------------------
// Authentication Token
// ----------------------------------------------------------------------------

/// Shared secret used to authenticate and sign channel traffic
///
/// The `Debug` output is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    /// Create a token, rejecting anything shorter than [`MIN_TOKEN_LENGTH`]
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigError> {
        let token = AuthToken(token.into());
        token.validate()?;
        Ok(token)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let length = self.0.chars().count();
        if length < MIN_TOKEN_LENGTH {
            return Err(ConfigError::TokenTooShort {
                length,
                min: MIN_TOKEN_LENGTH,
            });
        }
        Ok(())
    }

    /// Raw token bytes, for keying signatures
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<{} chars>)", self.0.chars().count())
    }
}

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Reconnect policy for a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Whether lost or failed connections are retried automatically
    pub enabled: bool,
    /// Attempt count at which the channel gives up and fails
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single reconnect delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never reconnects automatically
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Short delays for tests and local runs
    pub fn testing() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 10,
            max_delay_ms: 100,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "initial_delay_ms must be positive".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: format!(
                    "max_delay_ms ({}) is below initial_delay_ms ({})",
                    self.max_delay_ms, self.initial_delay_ms
                ),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Policy
// ----------------------------------------------------------------------------

/// Liveness probing policy for a connected channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatPolicy {
    pub enabled: bool,
    /// Time between probes
    pub interval_ms: u64,
    /// How long a single probe may take before it counts as failed
    pub timeout_ms: u64,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 15_000,
            timeout_ms: 30_000,
        }
    }
}

impl HeartbeatPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Fast probing for tests and local runs
    pub fn testing() -> Self {
        Self {
            enabled: true,
            interval_ms: 50,
            timeout_ms: 25,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidHeartbeatPolicy {
                reason: "interval_ms must be positive".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidHeartbeatPolicy {
                reason: "timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Connection Parameters
// ----------------------------------------------------------------------------

fn default_topic_prefix() -> String {
    "agents".to_string()
}

/// Transport-specific connection parameters
///
/// Opaque to the lifecycle layer; only the matching driver reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionParams {
    /// Pub/sub broker (`redis://`, `nats://`, `amqp://`, ...)
    PubSub {
        url: String,
        #[serde(default = "default_topic_prefix")]
        topic_prefix: String,
    },
    /// Chat platform bot API
    Chat { api_url: String, room: String },
    /// Real-time hub over websockets
    Hub { url: String, hub: String },
    /// In-process hub
    Local { hub: String },
}

impl ConnectionParams {
    /// Transport the parameters belong to
    pub fn transport_type(&self) -> TransportType {
        match self {
            ConnectionParams::PubSub { .. } => TransportType::PubSub,
            ConnectionParams::Chat { .. } => TransportType::Chat,
            ConnectionParams::Hub { .. } => TransportType::Hub,
            ConnectionParams::Local { .. } => TransportType::Local,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ConnectionParams::PubSub { url, topic_prefix } => {
                parse_endpoint(url, &["redis", "rediss", "nats", "amqp", "amqps", "mqtt"])?;
                require_name("topic_prefix", topic_prefix)
            }
            ConnectionParams::Chat { api_url, room } => {
                parse_endpoint(api_url, &["http", "https"])?;
                require_name("room", room)
            }
            ConnectionParams::Hub { url, hub } => {
                parse_endpoint(url, &["ws", "wss", "http", "https"])?;
                require_name("hub", hub)
            }
            ConnectionParams::Local { hub } => require_name("hub", hub),
        }
    }
}

fn parse_endpoint(raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidConnectionParams {
        reason: format!("invalid url {:?}: {}", raw, e),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidConnectionParams {
            reason: format!(
                "unsupported scheme {:?} (expected one of {})",
                url.scheme(),
                schemes.join(", ")
            ),
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidConnectionParams {
            reason: format!("url {:?} has no host", raw),
        });
    }
    Ok(url)
}

fn require_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidConnectionParams {
            reason: format!("{} must not be empty", field),
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Declared transport; must agree with `connection`
    #[serde(rename = "type")]
    pub transport: TransportType,
    pub token: AuthToken,
    pub connection: ConnectionParams,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub heartbeat: HeartbeatPolicy,
}

impl ChannelConfig {
    /// Build a config with default retry and heartbeat policies
    pub fn new(token: impl Into<String>, connection: ConnectionParams) -> Result<Self, ConfigError> {
        let config = Self {
            transport: connection.transport_type(),
            token: AuthToken::new(token)?,
            connection,
            retry: RetryPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatPolicy) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Check every section of the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token.validate()?;
        self.connection.validate()?;
        let actual = self.connection.transport_type();
        if self.transport != actual {
            return Err(ConfigError::TransportMismatch {
                declared: self.transport,
                actual,
            });
        }
        self.retry.validate()?;
        self.heartbeat.validate()?;
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ChannelConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Whether outbound envelopes must carry a signature
    pub fn requires_signing(&self) -> bool {
        !self.transport.has_native_access_control()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
