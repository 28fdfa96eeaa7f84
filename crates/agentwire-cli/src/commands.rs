//! Command handlers for the agentwire CLI

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use agentwire_core::{
    AgentId, ChannelConfig, ChannelError, ChannelId, ConnectionParams, HeartbeatPolicy, Message,
    MessageType, RetryPolicy, TransportType,
};
use agentwire_harness::{LocalDriver, LocalHub};
use agentwire_runtime::{Channel, ChannelManager, StatsSnapshot};

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};

const DEMO_TOKEN: &str = "agentwire-local-demo-token";
const DEMO_TASK_ID: &str = "demo-task-1";
const DEMO_TIMEOUT: Duration = Duration::from_secs(10);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Check { config } => Self::handle_check_command(&config),
            Commands::Demo { agents, config } => {
                Self::handle_demo_command(agents, config.as_deref()).await
            }
        }
    }

    fn handle_check_command(path: &Path) -> Result<()> {
        info!("Checking configuration: {}", path.display());
        let report = check_config(path)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn handle_demo_command(agents: usize, config: Option<&Path>) -> Result<()> {
        let config = match config {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                ChannelConfig::load_from_file(path)?
            }
            None => default_demo_config()?,
        };

        let report = run_demo(agents, config).await?;
        println!(
            "{} of {} workers answered the task assignment\n",
            report.replies,
            report.agents.len() - 1
        );
        print_stats_table(&report.agents);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Check
// ----------------------------------------------------------------------------

/// Effective settings of a validated config, without the token
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub transport: TransportType,
    pub signed_messages: bool,
    pub connection: ConnectionParams,
    pub retry: RetryPolicy,
    pub heartbeat: HeartbeatPolicy,
}

impl From<&ChannelConfig> for ConfigReport {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            transport: config.transport,
            signed_messages: config.requires_signing(),
            connection: config.connection.clone(),
            retry: config.retry.clone(),
            heartbeat: config.heartbeat.clone(),
        }
    }
}

pub fn check_config(path: &Path) -> Result<ConfigReport> {
    let config = ChannelConfig::load_from_file(path)?;
    Ok(ConfigReport::from(&config))
}

// ----------------------------------------------------------------------------
// Demo
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub agent: AgentId,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    /// Status replies the coordinator received
    pub replies: usize,
    /// Per-agent statistics taken before disconnecting; the coordinator first
    pub agents: Vec<AgentSummary>,
}

pub fn default_demo_config() -> Result<ChannelConfig> {
    let config = ChannelConfig::new(
        DEMO_TOKEN,
        ConnectionParams::Local {
            hub: "demo".to_string(),
        },
    )?
    .with_heartbeat(HeartbeatPolicy {
        enabled: true,
        interval_ms: 1_000,
        timeout_ms: 500,
    });
    Ok(config)
}

/// Connect `agents` channels to one local hub and run a task round-trip
///
/// Agent 0 broadcasts a task assignment; every other agent answers with a
/// unicast status. Resolves once all answers arrived.
pub async fn run_demo(agents: usize, config: ChannelConfig) -> Result<DemoReport> {
    if agents < 2 {
        return Err(CliError::InvalidArgument(format!(
            "demo needs at least 2 agents, got {agents}"
        )));
    }
    let ConnectionParams::Local { hub } = &config.connection else {
        return Err(CliError::InvalidArgument(format!(
            "demo runs on the local transport, config declares {}",
            config.transport
        )));
    };

    let hub = LocalHub::new(hub.clone());
    let manager = ChannelManager::new();
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<(usize, Message)>();
    let mut roster: Vec<(AgentId, ChannelId)> = Vec::with_capacity(agents);

    for index in 0..agents {
        let agent = AgentId::new(format!("agent-{index}")).map_err(ChannelError::from)?;
        let driver = Arc::new(LocalDriver::new(Arc::clone(&hub), agent.clone()));
        let channel = Channel::new(config.clone(), driver)?;

        let inbox = inbox_tx.clone();
        channel.on_message(move |message| {
            inbox
                .send((index, message.clone()))
                .map_err(|_| "demo inbox closed".into())
        });
        roster.push((agent, manager.add(channel)));
    }
    drop(inbox_tx);

    let failure = manager
        .connect_all()
        .await
        .into_iter()
        .find_map(|(_, result)| result.err());
    if let Some(err) = failure {
        manager.disconnect_all().await;
        return Err(err.into());
    }
    info!(agents, hub = %hub.name(), "All agents connected");

    let coordinator = channel_of(&manager, &roster[0].1)?;
    coordinator
        .send_message(Message::broadcast(
            roster[0].0.clone(),
            MessageType::TaskAssignment,
            json!({ "task_id": DEMO_TASK_ID, "description": "say hello" }),
        ))
        .await?;

    let expected = agents - 1;
    let exchange = async {
        let mut replies = 0;
        while replies < expected {
            let Some((index, message)) = inbox_rx.recv().await else {
                break;
            };
            match message.message_type {
                MessageType::TaskAssignment if index != 0 => {
                    let (agent, id) = &roster[index];
                    debug!(agent = %agent, task = %message.payload["task_id"], "Assignment received");
                    let reply = Message::direct(
                        agent.clone(),
                        message.sender_id.clone(),
                        MessageType::TaskStatus,
                        json!({ "task_id": message.payload["task_id"].clone(), "status": "accepted" }),
                    );
                    channel_of(&manager, id)?.send_message(reply).await?;
                }
                MessageType::TaskStatus if index == 0 => {
                    replies += 1;
                    info!(from = %message.sender_id, replies, expected, "Status received");
                }
                _ => {}
            }
        }
        Ok::<usize, CliError>(replies)
    };
    let outcome = match timeout(DEMO_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => Err(CliError::Demo(format!(
            "timed out after {}s waiting for replies",
            DEMO_TIMEOUT.as_secs()
        ))),
    };

    let summaries = roster
        .iter()
        .filter_map(|(agent, id)| {
            manager.get(id).map(|channel| AgentSummary {
                agent: agent.clone(),
                stats: channel.stats(),
            })
        })
        .collect();
    manager.disconnect_all().await;

    let replies = outcome?;
    if replies < expected {
        warn!(replies, expected, "Not every worker answered");
    }
    Ok(DemoReport {
        replies,
        agents: summaries,
    })
}

fn channel_of(manager: &ChannelManager, id: &ChannelId) -> Result<Channel> {
    manager
        .get(id)
        .ok_or_else(|| CliError::Demo(format!("channel {id} vanished")))
}

fn print_stats_table(agents: &[AgentSummary]) {
    println!(
        "{:<12} {:<13} {:>6} {:>6} {:>8} {:>8}",
        "AGENT", "STATUS", "SENT", "RECV", "BYTES", "DROPPED"
    );
    for summary in agents {
        let stats = &summary.stats;
        println!(
            "{:<12} {:<13} {:>6} {:>6} {:>8} {:>8}",
            summary.agent.as_str(),
            stats.status.as_str(),
            stats.messages_sent,
            stats.messages_received,
            stats.bytes_transferred,
            stats.frames_dropped
        );
    }
}
