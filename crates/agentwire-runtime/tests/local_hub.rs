//! Agents exchanging messages through an in-process hub

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentwire_harness::{LocalDriver, LocalHub};
use agentwire_runtime::{
    AgentId, Channel, ChannelConfig, ChannelError, ConnectionParams, ConnectionStatus,
    HeartbeatPolicy, Message, MessageType, RetryPolicy,
};
use serde_json::json;
use tokio::time::sleep;

fn join(hub: &Arc<LocalHub>, name: &str) -> (Channel, Arc<Mutex<Vec<Message>>>) {
    let config = ChannelConfig::new(
        "shared-hub-token-0123456",
        ConnectionParams::Local {
            hub: hub.name().to_string(),
        },
    )
    .unwrap()
    .with_retry(RetryPolicy::testing())
    .with_heartbeat(HeartbeatPolicy::testing());
    let driver = Arc::new(LocalDriver::new(
        Arc::clone(hub),
        AgentId::new(name).unwrap(),
    ));
    let channel = Channel::new(config, driver).unwrap();

    let inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    channel.on_message(move |message| {
        sink.lock().unwrap().push(message.clone());
        Ok(())
    });
    (channel, inbox)
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_and_direct_delivery() {
    let hub = LocalHub::new("crew");
    let (planner, planner_inbox) = join(&hub, "planner");
    let (worker_a, inbox_a) = join(&hub, "worker-a");
    let (worker_b, inbox_b) = join(&hub, "worker-b");
    for channel in [&planner, &worker_a, &worker_b] {
        channel.connect().await.unwrap();
    }
    assert_eq!(hub.members().len(), 3);

    planner
        .send_message(Message::broadcast(
            AgentId::new("planner").unwrap(),
            MessageType::TaskAssignment,
            json!({ "task_id": "t-1" }),
        ))
        .await
        .unwrap();
    worker_a
        .send_message(Message::direct(
            AgentId::new("worker-a").unwrap(),
            AgentId::new("planner").unwrap(),
            MessageType::TaskStatus,
            json!({ "task_id": "t-1", "status": "done" }),
        ))
        .await
        .unwrap();
    sleep(Duration::from_millis(1)).await;

    assert_eq!(inbox_a.lock().unwrap().len(), 1);
    assert_eq!(inbox_b.lock().unwrap().len(), 1);
    let planner_inbox = planner_inbox.lock().unwrap();
    assert_eq!(planner_inbox.len(), 1);
    assert_eq!(planner_inbox[0].payload["status"], "done");
}

#[tokio::test(start_paused = true)]
async fn test_unicast_to_absent_agent_fails() {
    let hub = LocalHub::new("crew");
    let (planner, _) = join(&hub, "planner");
    planner.connect().await.unwrap();

    let err = planner
        .send_message(Message::direct(
            AgentId::new("planner").unwrap(),
            AgentId::new("nobody").unwrap(),
            MessageType::Command,
            json!({ "command": "stop" }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Transport(_)));
    assert_eq!(planner.stats().messages_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_member_rejoins() {
    let hub = LocalHub::new("crew");
    let (worker, _) = join(&hub, "worker-a");
    worker.connect().await.unwrap();

    assert!(hub.drop_member(&AgentId::new("worker-a").unwrap(), "maintenance"));
    sleep(Duration::from_millis(1)).await;
    assert_eq!(worker.status(), ConnectionStatus::Reconnecting);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(worker.status(), ConnectionStatus::Connected);
    assert!(hub.is_member(&AgentId::new("worker-a").unwrap()));

    // Heartbeats keep passing once rejoined
    sleep(Duration::from_millis(500)).await;
    assert!(worker.is_connected());
    assert!(worker.stats().last_heartbeat.is_some());

    worker.disconnect().await;
    assert!(hub.members().is_empty());
}
