//! Error handling for the agentwire CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Channel error: {0}")]
    Channel(#[from] agentwire_core::ChannelError),

    #[error("Configuration error: {0}")]
    Config(#[from] agentwire_core::ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Demo failed: {0}")]
    Demo(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
