//! In-process hub transport
//!
//! A [`LocalHub`] is a named meeting point for agents running in one process.
//! Each agent gets a [`LocalDriver`]; opening it joins the hub, broadcasts reach
//! every other member and unicasts reach exactly one. The hub can evict a
//! member, which the member's channel sees as the transport closing.

use alloc::{string::String, sync::Arc, vec::Vec};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};

use agentwire_core::{
    AgentId, DriverEvent, DriverEventSender, TransportDriver, TransportError, TransportType,
};
use async_trait::async_trait;
use dashmap::DashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

// ----------------------------------------------------------------------------
// Hub
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct LocalHub {
    name: String,
    members: DashMap<AgentId, DriverEventSender>,
}

impl LocalHub {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            members: DashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current members, sorted
    pub fn members(&self) -> SmallVec<[AgentId; 8]> {
        let mut members: SmallVec<[AgentId; 8]> =
            self.members.iter().map(|entry| entry.key().clone()).collect();
        members.sort();
        members
    }

    pub fn is_member(&self, agent: &AgentId) -> bool {
        self.members.contains_key(agent)
    }

    /// Evict `agent`; its channel receives a close event with `reason`
    pub fn drop_member(&self, agent: &AgentId, reason: impl Into<String>) -> bool {
        match self.members.remove(agent) {
            Some((_, events)) => {
                debug!(hub = %self.name, agent = %agent, "Member evicted");
                let _ = events.send(DriverEvent::Closed {
                    reason: reason.into(),
                });
                true
            }
            None => false,
        }
    }

    fn join(&self, agent: AgentId, events: DriverEventSender) {
        debug!(hub = %self.name, agent = %agent, "Member joined");
        self.members.insert(agent, events);
    }

    fn leave(&self, agent: &AgentId) {
        if self.members.remove(agent).is_some() {
            debug!(hub = %self.name, agent = %agent, "Member left");
        }
    }

    /// Deliver to every member except `from`; returns the fan-out
    fn fan_out(&self, from: &AgentId, frame: &[u8]) -> usize {
        let mut delivered = 0;
        for entry in self.members.iter() {
            if entry.key() == from {
                continue;
            }
            if entry.value().send(DriverEvent::Frame(frame.to_vec())).is_ok() {
                delivered += 1;
            }
        }
        trace!(hub = %self.name, from = %from, delivered, "Broadcast fanned out");
        delivered
    }

    fn deliver(&self, to: &AgentId, frame: Vec<u8>) -> Result<(), TransportError> {
        let member = self
            .members
            .get(to)
            .ok_or_else(|| TransportError::UnknownRecipient {
                recipient: to.to_string(),
            })?;
        member
            .send(DriverEvent::Frame(frame))
            .map_err(|_| TransportError::send_failed(format!("{to} stopped listening")))
    }
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

pub struct LocalDriver {
    hub: Arc<LocalHub>,
    agent: AgentId,
    events: Mutex<Option<DriverEventSender>>,
    open: AtomicBool,
}

impl LocalDriver {
    pub fn new(hub: Arc<LocalHub>, agent: AgentId) -> Self {
        Self {
            hub,
            agent,
            events: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    // Eviction by the hub also counts as closed
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) && self.hub.is_member(&self.agent) {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

#[async_trait]
impl TransportDriver for LocalDriver {
    fn attach(&self, events: DriverEventSender) {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Local
    }

    async fn open(&self) -> Result<(), TransportError> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TransportError::open_failed(TransportType::Local, "driver not attached"))?;
        self.hub.join(self.agent.clone(), events);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.hub.leave(&self.agent);
        Ok(())
    }

    async fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.hub.fan_out(&self.agent, &frame);
        Ok(())
    }

    async fn send_to(&self, recipient: &AgentId, frame: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.hub.deliver(recipient, frame)
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.ensure_open()
    }
}
