//! Mock Driver for Testing
//!
//! A deterministic [`TransportDriver`] whose failures are scripted by the test.
//! Every call is recorded so tests can assert on exactly what a channel asked
//! the transport to do, and unsolicited events can be injected at will.

use alloc::{string::String, vec::Vec};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use agentwire_core::{
    AgentId, DriverEvent, DriverEventSender, TransportDriver, TransportError, TransportType,
};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

// ----------------------------------------------------------------------------
// Recorded Calls
// ----------------------------------------------------------------------------

/// A driver operation as the channel invoked it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open,
    Close,
    Broadcast(Vec<u8>),
    SendTo(AgentId, Vec<u8>),
    Probe,
}

#[derive(Debug, Default)]
struct Script {
    failing_opens: u32,
    all_opens_fail: bool,
    open_delay: Option<Duration>,
    probe_failing: bool,
    probe_delay: Option<Duration>,
    send_failing: bool,
    close_failing: bool,
}

// ----------------------------------------------------------------------------
// Mock Driver
// ----------------------------------------------------------------------------

pub struct MockDriver {
    transport: TransportType,
    script: Mutex<Script>,
    calls: Mutex<Vec<DriverCall>>,
    events: Mutex<Option<DriverEventSender>>,
    open: AtomicBool,
    opens: AtomicU32,
    closes: AtomicU32,
    probes: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDriver {
    /// A driver for `transport` on which every operation succeeds
    pub fn new(transport: TransportType) -> Self {
        Self {
            transport,
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            open: AtomicBool::new(false),
            opens: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        }
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    /// The next `count` open attempts fail
    pub fn fail_next_opens(&self, count: u32) {
        lock(&self.script).failing_opens = count;
    }

    pub fn fail_all_opens(&self, failing: bool) {
        lock(&self.script).all_opens_fail = failing;
    }

    /// Delay every open by `delay` before it resolves
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        lock(&self.script).open_delay = delay;
    }

    pub fn set_probe_failing(&self, failing: bool) {
        lock(&self.script).probe_failing = failing;
    }

    pub fn set_probe_delay(&self, delay: Option<Duration>) {
        lock(&self.script).probe_delay = delay;
    }

    pub fn set_send_failing(&self, failing: bool) {
        lock(&self.script).send_failing = failing;
    }

    pub fn set_close_failing(&self, failing: bool) {
        lock(&self.script).close_failing = failing;
    }

    // ------------------------------------------------------------------------
    // Event Injection
    // ------------------------------------------------------------------------

    /// Deliver an inbound frame; false if no channel is attached
    pub fn emit_frame(&self, frame: Vec<u8>) -> bool {
        self.emit(DriverEvent::Frame(frame))
    }

    /// Report the connection as dropped by the remote side
    pub fn emit_closed(&self, reason: impl Into<String>) -> bool {
        self.open.store(false, Ordering::SeqCst);
        self.emit(DriverEvent::Closed {
            reason: reason.into(),
        })
    }

    fn emit(&self, event: DriverEvent) -> bool {
        match lock(&self.events).as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn is_attached(&self) -> bool {
        lock(&self.events).is_some()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open attempts, failed ones included
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    pub fn broadcast_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                DriverCall::Broadcast(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn unicast_frames(&self) -> Vec<(AgentId, Vec<u8>)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                DriverCall::SendTo(to, frame) => Some((to.clone(), frame.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl TransportDriver for MockDriver {
    fn attach(&self, events: DriverEventSender) {
        *lock(&self.events) = Some(events);
    }

    fn transport_type(&self) -> TransportType {
        self.transport
    }

    async fn open(&self) -> Result<(), TransportError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(DriverCall::Open);

        let delay = lock(&self.script).open_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let fail = {
            let mut script = lock(&self.script);
            if script.failing_opens > 0 {
                script.failing_opens -= 1;
                true
            } else {
                script.all_opens_fail
            }
        };
        if fail {
            debug!(attempt, "Mock driver: scripted open failure");
            return Err(TransportError::open_failed(
                self.transport,
                "scripted open failure",
            ));
        }

        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record(DriverCall::Close);
        self.open.store(false, Ordering::SeqCst);
        if lock(&self.script).close_failing {
            return Err(TransportError::closed("scripted close failure"));
        }
        Ok(())
    }

    async fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.record(DriverCall::Broadcast(frame));
        if lock(&self.script).send_failing {
            return Err(TransportError::send_failed("scripted send failure"));
        }
        Ok(())
    }

    async fn send_to(&self, recipient: &AgentId, frame: Vec<u8>) -> Result<(), TransportError> {
        self.record(DriverCall::SendTo(recipient.clone(), frame));
        if lock(&self.script).send_failing {
            return Err(TransportError::send_failed("scripted send failure"));
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.record(DriverCall::Probe);

        let (failing, delay) = {
            let script = lock(&self.script);
            (script.probe_failing, script.probe_delay)
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if failing {
            return Err(TransportError::probe_failed("scripted probe failure"));
        }
        Ok(())
    }
}
