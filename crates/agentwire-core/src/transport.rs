//! Transport driver contract
//!
//! A driver turns one transport (broker, chat platform, hub) into the handful of
//! operations a channel needs. Everything the driver observes on its own, such
//! as inbound frames or the remote side going away, is reported as a
//! [`DriverEvent`] on the sender handed over in [`TransportDriver::attach`].

use alloc::{boxed::Box, string::String, vec::Vec};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::types::{AgentId, TransportType};

// ----------------------------------------------------------------------------
// Driver Events
// ----------------------------------------------------------------------------

/// Unsolicited events emitted by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Raw inbound frame, an encoded envelope
    Frame(Vec<u8>),
    /// The transport dropped the connection without being asked to
    Closed { reason: String },
}

pub type DriverEventSender = mpsc::UnboundedSender<DriverEvent>;
pub type DriverEventReceiver = mpsc::UnboundedReceiver<DriverEvent>;

/// Create the event channel connecting a driver to its channel
pub fn driver_event_channel() -> (DriverEventSender, DriverEventReceiver) {
    mpsc::unbounded_channel()
}

// ----------------------------------------------------------------------------
// Driver Trait
// ----------------------------------------------------------------------------

/// Operations every transport driver implements
///
/// Methods take `&self`; drivers synchronize their own internals so a channel
/// can probe and send concurrently.
#[async_trait]
pub trait TransportDriver: Send + Sync {
    /// Hand the driver the sender for unsolicited events
    ///
    /// Called once, when the owning channel is constructed.
    fn attach(&self, events: DriverEventSender);

    fn transport_type(&self) -> TransportType;

    /// Establish the underlying connection
    async fn open(&self) -> Result<(), TransportError>;

    /// Tear the connection down, best effort
    async fn close(&self) -> Result<(), TransportError>;

    /// Deliver a frame to every participant
    async fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Deliver a frame to a single participant
    async fn send_to(&self, recipient: &AgentId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Cheap liveness check, bounded by the caller's heartbeat timeout
    async fn probe(&self) -> Result<(), TransportError>;
}
