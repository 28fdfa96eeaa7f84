//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Load and validate a channel config, then print the effective policies
    Check {
        /// Path to a TOML channel config
        config: PathBuf,
    },
    /// Run several agents on an in-process hub and exchange a task round-trip
    Demo {
        /// Number of agents, including the coordinator
        #[arg(short, long, default_value_t = 3)]
        agents: usize,
        /// Channel config to use for every agent (must be a local transport)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
