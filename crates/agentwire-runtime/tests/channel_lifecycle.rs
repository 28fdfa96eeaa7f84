//! Channel lifecycle tests against the scriptable mock driver
//!
//! All tests run on a paused tokio clock, so backoff waits and heartbeat
//! intervals elapse instantly and deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentwire_core::{AgentId, AuthToken, MessageSigner};
use agentwire_harness::{signed_frame, unsigned_frame, DriverCall, MockDriver};
use agentwire_runtime::{
    Channel, ChannelConfig, ChannelError, ConnectionParams, ConnectionStatus, ErrorEvent,
    ErrorKind, HeartbeatPolicy, Message, MessageType, RetryPolicy, StateChangeEvent,
    TransportType,
};
use serde_json::json;
use tokio::time::sleep;

const TOKEN: &str = "lifecycle-test-token-0123";

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

fn config(retry: RetryPolicy, heartbeat: HeartbeatPolicy) -> ChannelConfig {
    ChannelConfig::new(
        TOKEN,
        ConnectionParams::Local {
            hub: "lifecycle".to_string(),
        },
    )
    .unwrap()
    .with_retry(retry)
    .with_heartbeat(heartbeat)
}

fn channel_with(retry: RetryPolicy, heartbeat: HeartbeatPolicy) -> (Channel, Arc<MockDriver>) {
    let driver = Arc::new(MockDriver::new(TransportType::Local));
    let channel = Channel::new(config(retry, heartbeat), driver.clone()).unwrap();
    (channel, driver)
}

fn quiet_channel() -> (Channel, Arc<MockDriver>) {
    channel_with(RetryPolicy::testing(), HeartbeatPolicy::disabled())
}

fn record_errors(channel: &Channel) -> Arc<Mutex<Vec<ErrorEvent>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    channel.on_error(move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    errors
}

fn record_states(channel: &Channel) -> Arc<Mutex<Vec<StateChangeEvent>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    channel.on_connection_state_change(move |event| {
        sink.lock().unwrap().push(*event);
        Ok(())
    });
    states
}

fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

fn signer() -> MessageSigner {
    MessageSigner::new(AuthToken::new(TOKEN).unwrap())
}

fn assignment(task: &str) -> Message {
    Message::broadcast(
        agent("planner"),
        MessageType::TaskAssignment,
        json!({ "task_id": task }),
    )
}

/// Let spawned tasks drain their queues
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

// ----------------------------------------------------------------------------
// Connect
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_is_noop() {
    let (channel, driver) = quiet_channel();
    channel.connect().await.unwrap();
    let states = record_states(&channel);

    channel.connect().await.unwrap();

    assert_eq!(driver.open_count(), 1);
    assert!(states.lock().unwrap().is_empty());
    assert!(channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_open_fails_twice_then_connects() {
    let (channel, driver) = quiet_channel();
    let errors = record_errors(&channel);
    let states = record_states(&channel);
    driver.fail_next_opens(2);

    channel.connect().await.unwrap();

    assert_eq!(channel.status(), ConnectionStatus::Connected);
    assert_eq!(driver.open_count(), 3);
    let stats = channel.stats();
    assert_eq!(stats.current_attempt, 0);
    assert_eq!(stats.reconnect_attempts, 2);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| e.kind == ErrorKind::Connect && !e.terminal));

    use ConnectionStatus::*;
    let path: Vec<_> = states.lock().unwrap().iter().map(|s| s.current).collect();
    assert_eq!(
        path,
        vec![Connecting, Reconnecting, Connecting, Reconnecting, Connecting, Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_fails_until_exhausted() {
    let (channel, driver) = quiet_channel();
    let errors = record_errors(&channel);
    driver.fail_all_opens(true);

    let err = channel.connect().await.unwrap_err();

    assert!(matches!(
        err,
        ChannelError::ReconnectExhausted { attempts: 5, .. }
    ));
    assert!(err.is_terminal());
    assert_eq!(channel.status(), ConnectionStatus::Failed);
    assert_eq!(driver.open_count(), 5);

    // Failed never heals on its own
    sleep(Duration::from_secs(60)).await;
    assert_eq!(driver.open_count(), 5);
    assert!(!channel.reconnect_pending());

    let errors = errors.lock().unwrap();
    let terminal: Vec<_> = errors.iter().filter(|e| e.terminal).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].kind, ErrorKind::ReconnectExhausted);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_without_retry_fails_once() {
    let (channel, driver) = channel_with(RetryPolicy::disabled(), HeartbeatPolicy::disabled());
    let errors = record_errors(&channel);
    driver.fail_all_opens(true);

    let err = channel.connect().await.unwrap_err();

    assert!(matches!(err, ChannelError::Transport(_)));
    assert_eq!(channel.status(), ConnectionStatus::Failed);
    assert_eq!(driver.open_count(), 1);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].terminal);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_failure_starts_over() {
    let (channel, driver) = quiet_channel();
    driver.fail_all_opens(true);
    assert!(channel.connect().await.is_err());

    driver.fail_all_opens(false);
    driver.fail_next_opens(4);
    channel.connect().await.unwrap();

    // A fresh counter allows the full budget again
    assert_eq!(channel.status(), ConnectionStatus::Connected);
    assert_eq!(driver.open_count(), 10);
}

// ----------------------------------------------------------------------------
// Connection Loss
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_triggers_reconnect() {
    let heartbeat = HeartbeatPolicy {
        enabled: true,
        interval_ms: 1_000,
        timeout_ms: 500,
    };
    let (channel, driver) = channel_with(RetryPolicy::default(), heartbeat);
    let errors = record_errors(&channel);
    channel.on_message(|_| Ok(()));
    channel.connect().await.unwrap();

    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(driver.probe_count(), 2);
    assert!(channel.stats().last_heartbeat.is_some());

    driver.set_probe_failing(true);
    sleep(Duration::from_millis(600)).await;

    assert_eq!(channel.status(), ConnectionStatus::Reconnecting);
    assert!(channel.reconnect_pending());
    assert_eq!(channel.handlers().message_handler_count(), 1);
    assert_eq!(errors.lock().unwrap()[0].kind, ErrorKind::Heartbeat);

    driver.set_probe_failing(false);
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(channel.status(), ConnectionStatus::Connected);
    assert_eq!(driver.open_count(), 2);
    assert_eq!(channel.stats().current_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_counts_as_failure() {
    let heartbeat = HeartbeatPolicy {
        enabled: true,
        interval_ms: 1_000,
        timeout_ms: 200,
    };
    let (channel, driver) = channel_with(RetryPolicy::default(), heartbeat);
    driver.set_probe_delay(Some(Duration::from_secs(5)));
    channel.connect().await.unwrap();

    sleep(Duration::from_millis(1_250)).await;
    assert_eq!(channel.status(), ConnectionStatus::Reconnecting);
    assert!(channel
        .stats()
        .last_error
        .unwrap()
        .contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_driver_closure_reconnects() {
    let (channel, driver) = quiet_channel();
    let states = record_states(&channel);
    channel.connect().await.unwrap();

    driver.emit_closed("broker restarted");
    settle().await;
    assert_eq!(channel.status(), ConnectionStatus::Reconnecting);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(channel.status(), ConnectionStatus::Connected);
    assert_eq!(driver.open_count(), 2);

    use ConnectionStatus::*;
    let path: Vec<_> = states.lock().unwrap().iter().map(|s| s.current).collect();
    assert_eq!(
        path,
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loss_signals_count_once() {
    let (channel, driver) = quiet_channel();
    let errors = record_errors(&channel);
    channel.connect().await.unwrap();

    driver.emit_closed("first");
    driver.emit_closed("second");
    settle().await;

    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(channel.stats().reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_loss_without_retry_fails() {
    let (channel, driver) = channel_with(RetryPolicy::disabled(), HeartbeatPolicy::disabled());
    let errors = record_errors(&channel);
    channel.connect().await.unwrap();

    driver.emit_closed("gone");
    settle().await;

    assert_eq!(channel.status(), ConnectionStatus::Failed);
    assert!(!channel.reconnect_pending());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::ConnectionLost);
    assert!(errors[0].terminal);
    assert_eq!(driver.close_count(), 1);
    assert!(!driver.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_loss_exhausting_budget_fails() {
    let retry = RetryPolicy {
        enabled: true,
        max_attempts: 1,
        initial_delay_ms: 10,
        max_delay_ms: 100,
    };
    let (channel, driver) = channel_with(retry, HeartbeatPolicy::disabled());
    let errors = record_errors(&channel);
    channel.connect().await.unwrap();

    driver.emit_closed("gone");
    settle().await;

    assert_eq!(channel.status(), ConnectionStatus::Failed);
    assert!(!channel.reconnect_pending());
    let errors = errors.lock().unwrap();
    let terminal: Vec<_> = errors.iter().filter(|e| e.terminal).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].kind, ErrorKind::ReconnectExhausted);
    assert_eq!(driver.close_count(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(driver.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_before_first_connect_are_discarded() {
    let (channel, driver) = quiet_channel();
    let states = record_states(&channel);
    let received = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&received);
    channel.on_message(move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    assert!(driver.emit_closed("stale"));
    assert!(driver.emit_frame(signed_frame(&signer(), assignment("t-early")).unwrap()));

    channel.connect().await.unwrap();
    settle().await;

    assert_eq!(channel.status(), ConnectionStatus::Connected);
    assert_eq!(driver.open_count(), 1);
    assert_eq!(*received.lock().unwrap(), 0);
    let stats = channel.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.messages_received, 0);

    use ConnectionStatus::*;
    let path: Vec<_> = states.lock().unwrap().iter().map(|s| s.current).collect();
    assert_eq!(path, vec![Connecting, Connected]);
}

// ----------------------------------------------------------------------------
// Disconnect
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let (channel, driver) = channel_with(RetryPolicy::default(), HeartbeatPolicy::disabled());
    channel.connect().await.unwrap();
    driver.emit_closed("flap");
    settle().await;
    assert!(channel.reconnect_pending());

    channel.disconnect().await;

    assert_eq!(channel.status(), ConnectionStatus::Disconnected);
    assert!(!channel.reconnect_pending());
    sleep(Duration::from_secs(120)).await;
    assert_eq!(driver.open_count(), 1);
    assert_eq!(driver.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_interrupts_connect_backoff() {
    let (channel, driver) = channel_with(RetryPolicy::default(), HeartbeatPolicy::disabled());
    driver.fail_all_opens(true);

    let connecting = channel.clone();
    let connect = tokio::spawn(async move { connecting.connect().await });
    sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.status(), ConnectionStatus::Reconnecting);

    channel.disconnect().await;

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(ChannelError::ConnectCancelled)));
    assert_eq!(channel.status(), ConnectionStatus::Disconnected);
    assert_eq!(driver.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_survives_close_failure() {
    let (channel, driver) = quiet_channel();
    channel.connect().await.unwrap();
    driver.set_close_failing(true);

    channel.disconnect().await;

    assert_eq!(channel.status(), ConnectionStatus::Disconnected);
    assert!(channel.stats().last_error.is_some());
    assert_eq!(driver.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_disconnect_still_cleans_up() {
    let (channel, driver) = quiet_channel();
    driver.set_open_delay(Some(Duration::from_secs(10)));

    // A connect parked in open holds the operation lock, so disconnect
    // suspends waiting for it and is dropped by the timeout
    let connecting = channel.clone();
    let connect = tokio::spawn(async move { connecting.connect().await });
    settle().await;
    assert_eq!(channel.status(), ConnectionStatus::Connecting);

    let dropped = tokio::time::timeout(Duration::from_millis(50), channel.disconnect()).await;
    assert!(dropped.is_err());
    assert_eq!(channel.status(), ConnectionStatus::Disconnected);

    // The parked connect sees the disconnect once open returns and closes
    // the transport it just opened
    let result = connect.await.unwrap();
    assert!(matches!(result, Err(ChannelError::ConnectCancelled)));
    settle().await;
    assert_eq!(channel.status(), ConnectionStatus::Disconnected);
    assert!(!driver.is_open());
    assert_eq!(driver.close_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_uptime_tracks_connection() {
    let (channel, _driver) = quiet_channel();
    assert_eq!(channel.stats().uptime, Duration::ZERO);

    channel.connect().await.unwrap();
    sleep(Duration::from_secs(5)).await;
    let first = channel.stats().uptime;
    assert!(first >= Duration::from_secs(5));
    sleep(Duration::from_secs(1)).await;
    assert!(channel.stats().uptime >= first);

    channel.disconnect().await;
    assert_eq!(channel.stats().uptime, Duration::ZERO);
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_send_requires_connection() {
    let (channel, driver) = quiet_channel();

    let err = channel.send_message(assignment("t-1")).await.unwrap_err();

    assert!(matches!(
        err,
        ChannelError::NotConnected {
            status: ConnectionStatus::Disconnected
        }
    ));
    assert!(driver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_routes_and_counts() {
    let (channel, driver) = quiet_channel();
    channel.connect().await.unwrap();

    channel.send_message(assignment("t-1")).await.unwrap();
    channel
        .send_message(Message::direct(
            agent("planner"),
            agent("worker-2"),
            MessageType::Command,
            json!({ "command": "pause" }),
        ))
        .await
        .unwrap();

    let calls = driver.calls();
    assert!(matches!(calls[1], DriverCall::Broadcast(_)));
    assert!(matches!(&calls[2], DriverCall::SendTo(to, _) if *to == agent("worker-2")));

    let stats = channel.stats();
    assert_eq!(stats.messages_sent, 2);
    let frame_bytes: usize = driver.broadcast_frames()[0].len() + driver.unicast_frames()[0].1.len();
    assert_eq!(stats.bytes_transferred, frame_bytes as u64);
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_is_returned_and_counted() {
    let (channel, driver) = quiet_channel();
    let errors = record_errors(&channel);
    channel.connect().await.unwrap();
    driver.set_send_failing(true);

    let err = channel.send_message(assignment("t-1")).await.unwrap_err();

    assert!(matches!(err, ChannelError::Transport(_)));
    let stats = channel.stats();
    assert_eq!(stats.messages_failed, 1);
    assert_eq!(stats.messages_sent, 0);
    assert!(stats.last_error.is_some());
    assert!(errors.lock().unwrap().is_empty());
    assert!(channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_handler_isolation() {
    let (channel, driver) = quiet_channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for index in 0..3 {
        let seen = Arc::clone(&seen);
        channel.on_message(move |message| {
            if index == 1 {
                panic!("handler {index} exploded");
            }
            seen.lock()
                .unwrap()
                .push((index, message.payload["task_id"].clone()));
            Ok(())
        });
    }
    channel.connect().await.unwrap();

    driver.emit_frame(signed_frame(&signer(), assignment("t-9")).unwrap());
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(0, json!("t-9")), (2, json!("t-9"))]);
    let stats = channel.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.handler_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_async_handler_and_removal() {
    let (channel, driver) = quiet_channel();
    let seen = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&seen);
    let id = channel.on_message_async(move |_message| {
        let counter = Arc::clone(&counter);
        async move {
            *counter.lock().unwrap() += 1;
            Ok(())
        }
    });
    channel.connect().await.unwrap();

    driver.emit_frame(signed_frame(&signer(), assignment("t-1")).unwrap());
    settle().await;
    assert_eq!(*seen.lock().unwrap(), 1);

    assert!(channel.remove_handler(id));
    assert!(!channel.remove_handler(id));
    driver.emit_frame(signed_frame(&signer(), assignment("t-2")).unwrap());
    settle().await;
    assert_eq!(*seen.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsigned_and_invalid_frames_dropped() {
    let (channel, driver) = quiet_channel();
    let received = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&received);
    channel.on_message(move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });
    let errors = record_errors(&channel);
    channel.connect().await.unwrap();

    driver.emit_frame(unsigned_frame(assignment("t-1")).unwrap());
    let wrong_key = MessageSigner::new(AuthToken::new("some-other-token-987654").unwrap());
    driver.emit_frame(signed_frame(&wrong_key, assignment("t-2")).unwrap());
    let missing_task = Message::broadcast(agent("planner"), MessageType::TaskAssignment, json!({}));
    driver.emit_frame(signed_frame(&signer(), missing_task).unwrap());
    driver.emit_frame(b"not json".to_vec());
    settle().await;

    assert_eq!(*received.lock().unwrap(), 0);
    let stats = channel.stats();
    assert_eq!(stats.frames_dropped, 4);
    assert_eq!(stats.messages_received, 0);
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ping_reports_rtt() {
    let (channel, driver) = quiet_channel();
    assert!(matches!(
        channel.ping().await,
        Err(ChannelError::NotConnected { .. })
    ));

    channel.connect().await.unwrap();
    driver.set_probe_delay(Some(Duration::from_millis(7)));
    let rtt = channel.ping().await.unwrap();
    assert!(rtt >= Duration::from_millis(7));
    assert_eq!(channel.stats().last_heartbeat_rtt, Some(rtt));
}
