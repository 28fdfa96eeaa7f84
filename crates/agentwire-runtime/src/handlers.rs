//! Handler Registry
//!
//! Subscribers for the three event classes a channel emits: inbound messages,
//! errors and connection state changes. Every handler invocation is isolated;
//! a handler that panics or returns an error is reported to the failure sink
//! and the remaining handlers of the same round still run.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use agentwire_core::{ChannelId, ConnectionStatus, Message, Timestamp};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::warn;

use crate::lock;

// ----------------------------------------------------------------------------
// Handler Types
// ----------------------------------------------------------------------------

/// Error a handler may return; it is logged and counted, never propagated
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

pub type MessageHandler = Arc<dyn Fn(&Message) -> HandlerResult + Send + Sync>;
pub type AsyncMessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ErrorEvent) -> HandlerResult + Send + Sync>;
pub type StateChangeHandler = Arc<dyn Fn(&StateChangeEvent) -> HandlerResult + Send + Sync>;

/// Stable identifier of a registration, unique within one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

#[derive(Clone)]
enum MessageSubscriber {
    Sync(MessageHandler),
    Async(AsyncMessageHandler),
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// What went wrong, for error subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A driver open attempt failed
    Connect,
    /// The driver reported the connection closed
    ConnectionLost,
    /// A heartbeat probe failed or timed out
    Heartbeat,
    /// The driver close path failed during disconnect
    Disconnect,
    /// Reconnection gave up; the channel is now failed
    ReconnectExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub channel_id: ChannelId,
    pub kind: ErrorKind,
    pub message: String,
    /// The channel entered `Failed` because of this error
    pub terminal: bool,
    pub at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChangeEvent {
    pub channel_id: ChannelId,
    pub current: ConnectionStatus,
    pub previous: ConnectionStatus,
    pub at: Timestamp,
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    message: Mutex<BTreeMap<HandlerId, MessageSubscriber>>,
    error: Mutex<BTreeMap<HandlerId, ErrorHandler>>,
    state_change: Mutex<BTreeMap<HandlerId, StateChangeHandler>>,
    failures: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        lock(&self.message).insert(id, MessageSubscriber::Sync(Arc::new(handler)));
        id
    }

    /// Register a handler whose future is spawned per message and never awaited
    pub fn register_message_async<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = self.allocate_id();
        let handler: AsyncMessageHandler = Arc::new(move |message| handler(message).boxed());
        lock(&self.message).insert(id, MessageSubscriber::Async(handler));
        id
    }

    pub fn register_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ErrorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        lock(&self.error).insert(id, Arc::new(handler));
        id
    }

    pub fn register_state_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StateChangeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        lock(&self.state_change).insert(id, Arc::new(handler));
        id
    }

    /// Remove a registration from whichever set holds it
    pub fn unregister(&self, id: HandlerId) -> bool {
        lock(&self.message).remove(&id).is_some()
            || lock(&self.error).remove(&id).is_some()
            || lock(&self.state_change).remove(&id).is_some()
    }

    pub fn message_handler_count(&self) -> usize {
        lock(&self.message).len()
    }

    pub fn error_handler_count(&self) -> usize {
        lock(&self.error).len()
    }

    pub fn state_change_handler_count(&self) -> usize {
        lock(&self.state_change).len()
    }

    /// Handler invocations that panicked or returned an error
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Fan a message out to every message handler in registration order
    ///
    /// Async handlers are spawned onto the current tokio runtime.
    pub fn dispatch_message(&self, message: &Message) {
        let subscribers: SmallVec<[(HandlerId, MessageSubscriber); 4]> = lock(&self.message)
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        for (id, subscriber) in subscribers {
            match subscriber {
                MessageSubscriber::Sync(handler) => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| handler(message)));
                    record_outcome(&self.failures, id, "message", outcome);
                }
                MessageSubscriber::Async(handler) => {
                    let failures = Arc::clone(&self.failures);
                    let message = message.clone();
                    tokio::spawn(async move {
                        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                            Err(panic) => Err(panic),
                        };
                        record_outcome(&failures, id, "async message", outcome);
                    });
                }
            }
        }
    }

    pub fn dispatch_error(&self, event: &ErrorEvent) {
        let handlers: SmallVec<[(HandlerId, ErrorHandler); 4]> = lock(&self.error)
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();
        for (id, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            record_outcome(&self.failures, id, "error", outcome);
        }
    }

    pub fn dispatch_state_change(&self, event: &StateChangeEvent) {
        let handlers: SmallVec<[(HandlerId, StateChangeHandler); 4]> = lock(&self.state_change)
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();
        for (id, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            record_outcome(&self.failures, id, "state change", outcome);
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message", &self.message_handler_count())
            .field("error", &self.error_handler_count())
            .field("state_change", &self.state_change_handler_count())
            .field("failures", &self.failure_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Failure Sink
// ----------------------------------------------------------------------------

type PanicPayload = Box<dyn std::any::Any + Send>;

fn record_outcome(
    failures: &AtomicU64,
    id: HandlerId,
    class: &'static str,
    outcome: Result<HandlerResult, PanicPayload>,
) {
    let reason = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(panic) => format!("panicked: {}", panic_message(&panic)),
    };
    failures.fetch_add(1, Ordering::Relaxed);
    warn!(handler = %id, class, %reason, "Handler failed");
}

fn panic_message(payload: &PanicPayload) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
