use std::path::PathBuf;

use agentwire_cli::{
    check_config, commands::default_demo_config, run_demo, Cli, CliError, Commands,
};
use agentwire_core::{ChannelConfig, ConnectionParams, ConnectionStatus, TransportType};
use clap::Parser;

#[test]
fn test_parse_check() {
    let cli = Cli::try_parse_from(["agentwire", "check", "channel.toml"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Check {
            config: PathBuf::from("channel.toml")
        }
    );
    assert!(!cli.verbose);
}

#[test]
fn test_parse_demo_defaults_and_flags() {
    let cli = Cli::try_parse_from(["agentwire", "demo"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Demo {
            agents: 3,
            config: None
        }
    );

    let cli = Cli::try_parse_from(["agentwire", "demo", "--agents", "5", "--verbose"]).unwrap();
    assert!(cli.verbose);
    assert!(matches!(cli.command, Commands::Demo { agents: 5, .. }));
}

#[test]
fn test_check_reports_effective_policies() {
    let path = std::env::temp_dir().join(format!("agentwire-check-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
type = "pub_sub"
token = "broker-token-0123456789"

[connection]
type = "pub_sub"
url = "redis://localhost:6379"

[retry]
max_attempts = 8
"#,
    )
    .unwrap();

    let report = check_config(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(report.transport, TransportType::PubSub);
    assert!(report.signed_messages);
    assert_eq!(report.retry.max_attempts, 8);
    assert_eq!(report.retry.initial_delay_ms, 1_000);
    assert!(report.heartbeat.enabled);
    let json = serde_json::to_string(&report).unwrap();
    assert!(!json.contains("broker-token"));
}

#[test]
fn test_check_missing_file_fails() {
    let result = check_config(std::path::Path::new("/nonexistent/agentwire.toml"));
    assert!(matches!(result, Err(CliError::Config(_))));
}

#[tokio::test]
async fn test_demo_round_trip() {
    let report = run_demo(4, default_demo_config().unwrap()).await.unwrap();

    assert_eq!(report.replies, 3);
    assert_eq!(report.agents.len(), 4);
    let coordinator = &report.agents[0].stats;
    assert_eq!(coordinator.status, ConnectionStatus::Connected);
    assert_eq!(coordinator.messages_sent, 1);
    assert_eq!(coordinator.messages_received, 3);
    for worker in &report.agents[1..] {
        assert_eq!(worker.stats.messages_received, 1);
        assert_eq!(worker.stats.messages_sent, 1);
        assert_eq!(worker.stats.frames_dropped, 0);
    }
}

#[tokio::test]
async fn test_demo_rejects_bad_arguments() {
    assert!(matches!(
        run_demo(1, default_demo_config().unwrap()).await,
        Err(CliError::InvalidArgument(_))
    ));

    let chat = ChannelConfig::new(
        "chat-token-0123456789",
        ConnectionParams::Chat {
            api_url: "https://chat.example.com".to_string(),
            room: "ops".to_string(),
        },
    )
    .unwrap();
    assert!(matches!(
        run_demo(3, chat).await,
        Err(CliError::InvalidArgument(_))
    ));
}
