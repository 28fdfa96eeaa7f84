//! agentwire CLI library
//!
//! Config checking and a local multi-agent demo built on `agentwire-runtime`.

pub mod cli;
pub mod commands;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{check_config, run_demo, CommandDispatcher, ConfigReport, DemoReport};
pub use error::{CliError, Result};
