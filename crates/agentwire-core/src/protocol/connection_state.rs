//! Connection State Machine
//!
//! Owns one channel's lifecycle status, the reconnect-attempt counter and the
//! "connected since" instant. Illegal transitions are rejected; transitions to
//! the current status are ignored and produce no change record.

use alloc::collections::VecDeque;
use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::Timestamp;

/// Number of transition records kept for diagnostics
pub const TRANSITION_HISTORY_LIMIT: usize = 64;

// ----------------------------------------------------------------------------
// Connection Status
// ----------------------------------------------------------------------------

/// Lifecycle status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Initial state, and the state after an explicit disconnect
    Disconnected,
    /// Driver open in progress
    Connecting,
    Connected,
    /// Waiting for the backoff timer before the next open attempt
    Reconnecting,
    /// Gave up; only an explicit connect leaves this state
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        }
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(&self, to: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Failed)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Failed)
                | (Connected, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Failed)
                | (Reconnecting, Disconnected)
                | (Failed, Connecting)
                | (Failed, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Transition Records
// ----------------------------------------------------------------------------

/// A status change, as delivered to state-change handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub current: ConnectionStatus,
    pub previous: ConnectionStatus,
    pub at: Timestamp,
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
}

// ----------------------------------------------------------------------------
// State Machine
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConnectionStateMachine {
    status: ConnectionStatus,
    attempts: u32,
    connected_at: Option<Instant>,
    history: VecDeque<StateChange>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            connected_at: None,
            history: VecDeque::with_capacity(TRANSITION_HISTORY_LIMIT),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Failed attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    /// Time spent connected; zero whenever not connected
    pub fn uptime(&self) -> Duration {
        match (self.status, self.connected_at) {
            (ConnectionStatus::Connected, Some(since)) => since.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Move to `to`
    ///
    /// Returns `Ok(None)` when already in `to`. Entering `Connected` resets the
    /// attempt counter and stamps the connection start; leaving it clears the
    /// stamp.
    pub fn transition(
        &mut self,
        to: ConnectionStatus,
    ) -> Result<Option<StateChange>, StateTransitionError> {
        let from = self.status;
        if from == to {
            return Ok(None);
        }
        if !from.can_transition_to(to) {
            return Err(StateTransitionError::InvalidTransition { from, to });
        }

        self.status = to;
        if to == ConnectionStatus::Connected {
            self.attempts = 0;
            self.connected_at = Some(Instant::now());
        } else if from == ConnectionStatus::Connected {
            self.connected_at = None;
        }

        let change = StateChange {
            current: to,
            previous: from,
            at: Timestamp::now(),
        };
        if self.history.len() == TRANSITION_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(change);
        Ok(Some(change))
    }

    /// Count one more failed attempt and return the new count
    pub fn record_failed_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Start a fresh connect sequence from zero
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> Vec<StateChange> {
        self.history.iter().copied().collect()
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
