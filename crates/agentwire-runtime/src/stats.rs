//! Channel statistics
//!
//! Counters are lock-free and only ever grow; the few non-counter fields sit
//! behind short mutex sections. Callers read an owned [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use agentwire_core::{ConnectionStatus, Timestamp};
use serde::Serialize;

use crate::lock;

#[derive(Debug, Default)]
pub struct ChannelStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_failed: AtomicU64,
    bytes_transferred: AtomicU64,
    frames_dropped: AtomicU64,
    reconnect_attempts: AtomicU64,
    last_heartbeat: Mutex<Option<(Timestamp, Duration)>>,
    last_error: Mutex<Option<String>>,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_send_success(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self, error: impl ToString) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    /// Count bytes of an inbound frame, accepted or not
    pub fn record_inbound_bytes(&self, bytes: usize) {
        self.bytes_transferred
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// An inbound frame failed decoding, authentication or validation
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self, rtt: Duration) {
        *lock(&self.last_heartbeat) = Some((Timestamp::now(), rtt));
    }

    pub fn record_error(&self, error: impl ToString) {
        *lock(&self.last_error) = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Owned view of the counters, completed with lifecycle data the stats
    /// block does not own
    pub fn snapshot(&self, lifecycle: LifecycleView) -> StatsSnapshot {
        let heartbeat = *lock(&self.last_heartbeat);
        StatsSnapshot {
            status: lifecycle.status,
            uptime: lifecycle.uptime,
            current_attempt: lifecycle.current_attempt,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            handler_failures: lifecycle.handler_failures,
            last_heartbeat: heartbeat.map(|(at, _)| at),
            last_heartbeat_rtt: heartbeat.map(|(_, rtt)| rtt),
            last_error: self.last_error(),
        }
    }
}

/// Lifecycle fields merged into a snapshot
#[derive(Debug, Clone, Copy)]
pub struct LifecycleView {
    pub status: ConnectionStatus,
    pub uptime: Duration,
    pub current_attempt: u32,
    pub handler_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub status: ConnectionStatus,
    /// Zero unless connected
    pub uptime: Duration,
    /// Failed attempts since the last successful connect
    pub current_attempt: u32,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_failed: u64,
    /// Outbound plus inbound
    pub bytes_transferred: u64,
    pub frames_dropped: u64,
    /// Reconnects scheduled over the channel's lifetime
    pub reconnect_attempts: u64,
    pub handler_failures: u64,
    pub last_heartbeat: Option<Timestamp>,
    pub last_heartbeat_rtt: Option<Duration>,
    pub last_error: Option<String>,
}
