//! Channel Facade
//!
//! A [`Channel`] turns one transport driver into a uniform connection with
//! connect/disconnect semantics, automatic reconnection with backoff, periodic
//! heartbeats, isolated handler dispatch and broadcast/unicast routing.
//!
//! Each channel runs at most three background tasks on the tokio runtime: the
//! inbound event pump, the heartbeat monitor and a single reconnect task. User
//! operations are serialized by an async operation lock. State changes and the
//! dispatch of their notifications happen under one short notification lock,
//! so state-change handlers observe transitions in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use agentwire_core::{
    transport::driver_event_channel, BackoffPolicy, ChannelConfig, ChannelError, ChannelId,
    ChannelResult, ConfigError, ConnectionStateMachine, ConnectionStatus, DriverEvent,
    DriverEventReceiver, Message, MessageSigner, MessageValidator, StateChange, SystemTimeSource,
    TimeSource, Timestamp, TransportDriver, TransportError, TransportType, ValidationConfig,
};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::handlers::{
    ErrorEvent, ErrorKind, HandlerId, HandlerRegistry, HandlerResult, StateChangeEvent,
};
use crate::heartbeat::{probe_with_timeout, HeartbeatMonitor, HeartbeatTarget};
use crate::ingress::Ingress;
use crate::lock;
use crate::router::MessageRouter;
use crate::stats::{ChannelStats, LifecycleView, StatsSnapshot};

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for channels that need non-default validation or a custom clock
pub struct ChannelBuilder {
    config: ChannelConfig,
    driver: Arc<dyn TransportDriver>,
    validation: ValidationConfig,
    time_source: Arc<dyn TimeSource>,
}

impl ChannelBuilder {
    pub fn new(config: ChannelConfig, driver: Arc<dyn TransportDriver>) -> Self {
        Self {
            config,
            driver,
            validation: ValidationConfig::default(),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Inbound validation limits
    pub fn validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Clock used to judge inbound timestamps
    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Validate the config, attach the driver and create the channel
    ///
    /// Does not touch the network; the channel starts `Disconnected`.
    pub fn build(self) -> ChannelResult<Channel> {
        let Self {
            config,
            driver,
            validation,
            time_source,
        } = self;

        config.validate()?;
        let actual = driver.transport_type();
        if actual != config.transport {
            return Err(ConfigError::TransportMismatch {
                declared: config.transport,
                actual,
            }
            .into());
        }

        let signer = config
            .requires_signing()
            .then(|| MessageSigner::new(config.token.clone()));
        let (events_tx, events_rx) = driver_event_channel();
        driver.attach(events_tx);

        let id = ChannelId::new();
        let inner = Arc::new_cyclic(|this| ChannelInner {
            id,
            this: this.clone(),
            backoff: BackoffPolicy::from_retry(&config.retry),
            router: MessageRouter::new(Arc::clone(&driver), signer.clone()),
            ingress: Ingress::new(
                signer,
                MessageValidator::with_time_source(validation, time_source),
            ),
            config: Arc::new(config),
            driver,
            handlers: HandlerRegistry::new(),
            stats: ChannelStats::new(),
            state: Mutex::new(ConnectionStateMachine::new()),
            notify_lock: Mutex::new(()),
            op_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Tasks::default()),
            events: Mutex::new(Some(events_rx)),
            closing: AtomicBool::new(false),
            cancel: Notify::new(),
        });

        debug!(channel = %id, transport = %inner.config.transport, "Channel created");
        Ok(Channel { inner })
    }
}

// ----------------------------------------------------------------------------
// Channel Handle
// ----------------------------------------------------------------------------

/// Cheap-to-clone handle to one logical connection
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a channel with default validation
    pub fn new(config: ChannelConfig, driver: Arc<dyn TransportDriver>) -> ChannelResult<Self> {
        ChannelBuilder::new(config, driver).build()
    }

    pub fn builder(config: ChannelConfig, driver: Arc<dyn TransportDriver>) -> ChannelBuilder {
        ChannelBuilder::new(config, driver)
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    pub fn transport_type(&self) -> TransportType {
        self.inner.config.transport
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Recent state transitions, oldest first
    pub fn transition_history(&self) -> Vec<StateChange> {
        lock(&self.inner.state).history()
    }

    /// Whether a reconnect task is armed or running
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.tasks)
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Connect, retrying with backoff when the retry policy allows
    ///
    /// Resolves once the channel is `Connected` or has given up. Calling it on
    /// a connected channel does nothing.
    pub async fn connect(&self) -> ChannelResult<()> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;
        if inner.status() == ConnectionStatus::Connected {
            debug!(channel = %inner.id, "Already connected");
            return Ok(());
        }

        inner.cancel_reconnect().await;
        // The aborted reconnect task may have finished connecting first
        if inner.status() == ConnectionStatus::Connected {
            return Ok(());
        }

        {
            let _notify = lock(&inner.notify_lock);
            inner.closing.store(false, Ordering::SeqCst);
            lock(&inner.state).reset_attempts();
        }
        inner.ensure_pump();

        info!(channel = %inner.id, transport = %inner.config.transport, "Connecting");
        inner.run_connect_loop().await
    }

    /// Tear the connection down
    ///
    /// Cancels the heartbeat and any pending reconnect, always calls the
    /// driver's close path and ends `Disconnected`, even when close fails or
    /// this future is dropped before completing. Close errors are logged and
    /// recorded as the last error.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let (reconnect, heartbeat) = {
            let _notify = lock(&inner.notify_lock);
            inner.closing.store(true, Ordering::SeqCst);
            let mut tasks = lock(&inner.tasks);
            (tasks.reconnect.take(), tasks.heartbeat.take())
        };
        inner.cancel.notify_waiters();

        let mut cleanup = DisconnectGuard {
            inner,
            closed: false,
            _op: None,
        };
        if let Some(task) = heartbeat {
            task.abort();
        }
        if let Some(task) = reconnect {
            task.abort();
            let _ = task.await;
        }
        cleanup._op = Some(inner.op_lock.lock().await);

        info!(channel = %inner.id, "Disconnecting");
        if let Err(err) = inner.driver.close().await {
            warn!(channel = %inner.id, error = %err, "Driver close failed");
            inner.stats.record_error(&err);
        }
        cleanup.closed = true;
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Send a message; broadcast when it has no recipient, unicast otherwise
    ///
    /// Fails with `NotConnected` without touching the driver unless the
    /// channel is connected. Driver errors are returned, never retried.
    pub async fn send_message(&self, message: Message) -> ChannelResult<()> {
        let inner = &self.inner;
        let status = inner.status();
        if status != ConnectionStatus::Connected {
            return Err(ChannelError::not_connected(status));
        }

        match inner.router.deliver(&message).await {
            Ok(bytes) => {
                inner.stats.record_send_success(bytes);
                debug!(
                    channel = %inner.id,
                    message_id = %message.id,
                    message_type = %message.message_type,
                    broadcast = message.is_broadcast(),
                    bytes,
                    "Message sent"
                );
                Ok(())
            }
            Err(err) => {
                inner.stats.record_send_failure(&err);
                warn!(channel = %inner.id, message_id = %message.id, error = %err, "Send failed");
                Err(err)
            }
        }
    }

    /// Probe the driver once and return the round-trip time
    pub async fn ping(&self) -> ChannelResult<Duration> {
        let inner = &self.inner;
        let status = inner.status();
        if status != ConnectionStatus::Connected {
            return Err(ChannelError::not_connected(status));
        }
        match probe_with_timeout(inner.driver.as_ref(), inner.config.heartbeat.timeout()).await {
            Ok(rtt) => {
                inner.stats.record_heartbeat(rtt);
                Ok(rtt)
            }
            Err(err) => {
                inner.stats.record_error(&err);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handlers.register_message(handler)
    }

    /// Register an async message handler; each invocation runs as its own task
    pub fn on_message_async<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.handlers.register_message_async(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ErrorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handlers.register_error(handler)
    }

    pub fn on_connection_state_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StateChangeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handlers.register_state_change(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.unregister(id)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> StatsSnapshot {
        let inner = &self.inner;
        let (status, uptime, current_attempt) = {
            let state = lock(&inner.state);
            (state.status(), state.uptime(), state.attempts())
        };
        inner.stats.snapshot(LifecycleView {
            status,
            uptime,
            current_attempt,
            handler_failures: inner.handlers.failure_count(),
        })
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.config.transport)
            .field("status", &self.status())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Channel Internals
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Tasks {
    reconnect: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for task in [
            self.reconnect.take(),
            self.heartbeat.take(),
            self.pump.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LossCause {
    Heartbeat,
    TransportClosed,
}

impl LossCause {
    fn error_kind(self) -> ErrorKind {
        match self {
            LossCause::Heartbeat => ErrorKind::Heartbeat,
            LossCause::TransportClosed => ErrorKind::ConnectionLost,
        }
    }
}

struct ChannelInner {
    id: ChannelId,
    this: Weak<ChannelInner>,
    config: Arc<ChannelConfig>,
    driver: Arc<dyn TransportDriver>,
    backoff: BackoffPolicy,
    router: MessageRouter,
    ingress: Ingress,
    handlers: HandlerRegistry,
    stats: ChannelStats,
    state: Mutex<ConnectionStateMachine>,
    // Held across a state change and its notification
    notify_lock: Mutex<()>,
    op_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Tasks>,
    events: Mutex<Option<DriverEventReceiver>>,
    // Set by disconnect; loss signals and connect loops back off while set
    closing: AtomicBool,
    cancel: Notify,
}

impl ChannelInner {
    fn status(&self) -> ConnectionStatus {
        lock(&self.state).status()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Apply a transition and notify state-change handlers
    ///
    /// The caller holds the notification lock.
    fn transition_locked(
        &self,
        _notify: &MutexGuard<'_, ()>,
        to: ConnectionStatus,
    ) -> ChannelResult<()> {
        let change = lock(&self.state).transition(to)?;
        if let Some(change) = change {
            debug!(
                channel = %self.id,
                from = %change.previous,
                to = %change.current,
                "State transition"
            );
            self.handlers.dispatch_state_change(&StateChangeEvent {
                channel_id: self.id,
                current: change.current,
                previous: change.previous,
                at: change.at,
            });
        }
        Ok(())
    }

    fn force_transition(&self, notify: &MutexGuard<'_, ()>, to: ConnectionStatus) {
        if let Err(err) = self.transition_locked(notify, to) {
            error!(channel = %self.id, error = %err, "Unexpected state transition failure");
        }
    }

    fn emit_error(&self, kind: ErrorKind, err: &ChannelError, terminal: bool) {
        let message = err.to_string();
        self.stats.record_error(&message);
        if terminal {
            error!(channel = %self.id, ?kind, error = %message, "Channel failed");
        } else {
            warn!(channel = %self.id, ?kind, error = %message, "Channel error");
        }
        self.handlers.dispatch_error(&ErrorEvent {
            channel_id: self.id,
            kind,
            message,
            terminal,
            at: Timestamp::now(),
        });
    }

    /// Move to `Failed` and report the terminal exhaustion error
    fn fail_exhausted(
        &self,
        notify: &MutexGuard<'_, ()>,
        attempts: u32,
        last: &ChannelError,
    ) -> ChannelError {
        self.force_transition(notify, ConnectionStatus::Failed);
        let terminal = ChannelError::ReconnectExhausted {
            attempts,
            last_error: last.to_string(),
        };
        self.emit_error(ErrorKind::ReconnectExhausted, &terminal, true);
        terminal
    }

    // ------------------------------------------------------------------------
    // Connect Loop
    // ------------------------------------------------------------------------

    async fn run_connect_loop(&self) -> ChannelResult<()> {
        loop {
            self.transition_unless_closing(ConnectionStatus::Connecting)?;
            debug!(channel = %self.id, attempt = lock(&self.state).attempts(), "Opening transport");

            match self.driver.open().await {
                Ok(()) => return self.enter_connected(),
                Err(err) => {
                    let delay = self.after_failed_open(err.into())?;
                    self.wait_or_cancel(delay).await?;
                }
            }
        }
    }

    fn transition_unless_closing(&self, to: ConnectionStatus) -> ChannelResult<()> {
        let notify = lock(&self.notify_lock);
        if self.is_closing() {
            return Err(ChannelError::ConnectCancelled);
        }
        self.transition_locked(&notify, to)
    }

    fn enter_connected(&self) -> ChannelResult<()> {
        let notify = lock(&self.notify_lock);
        if self.is_closing() {
            self.close_in_background();
            return Err(ChannelError::ConnectCancelled);
        }
        self.transition_locked(&notify, ConnectionStatus::Connected)?;
        self.start_heartbeat();
        info!(channel = %self.id, transport = %self.config.transport, "Connected");
        Ok(())
    }

    /// Record a failed open and decide what comes next
    ///
    /// Returns the backoff delay before the next attempt, or the error the
    /// connect loop ends with.
    fn after_failed_open(&self, err: ChannelError) -> ChannelResult<Duration> {
        let notify = lock(&self.notify_lock);
        if self.is_closing() {
            return Err(ChannelError::ConnectCancelled);
        }

        let retry = self.config.retry.enabled;
        self.emit_error(ErrorKind::Connect, &err, !retry);
        if !retry {
            self.force_transition(&notify, ConnectionStatus::Failed);
            return Err(err);
        }

        let attempt = lock(&self.state).record_failed_attempt();
        if self.backoff.is_exhausted(attempt) {
            return Err(self.fail_exhausted(&notify, attempt, &err));
        }

        self.transition_locked(&notify, ConnectionStatus::Reconnecting)?;
        self.stats.record_reconnect_attempt();
        let delay = self.backoff.delay(attempt);
        info!(
            channel = %self.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Open failed, retrying after backoff"
        );
        Ok(delay)
    }

    async fn wait_or_cancel(&self, delay: Duration) -> ChannelResult<()> {
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();
        if self.is_closing() {
            return Err(ChannelError::ConnectCancelled);
        }
        tokio::select! {
            _ = time::sleep(delay) => Ok(()),
            _ = cancelled => Err(ChannelError::ConnectCancelled),
        }
    }

    async fn cancel_reconnect(&self) {
        let task = lock(&self.tasks).reconnect.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    // ------------------------------------------------------------------------
    // Connection Loss
    // ------------------------------------------------------------------------

    /// React to a heartbeat failure or a driver-reported closure
    ///
    /// Only acts while connected, so concurrent loss signals count once.
    fn handle_connection_loss(&self, cause: LossCause, err: ChannelError) {
        let notify = lock(&self.notify_lock);
        if self.is_closing() {
            debug!(channel = %self.id, ?cause, "Ignoring connection loss during disconnect");
            return;
        }
        let status = self.status();
        if status != ConnectionStatus::Connected {
            debug!(channel = %self.id, ?cause, %status, "Ignoring connection loss signal");
            return;
        }

        self.stop_heartbeat();
        let retry = self.config.retry.enabled;
        self.emit_error(cause.error_kind(), &err, !retry);
        let attempt = lock(&self.state).record_failed_attempt();

        if !retry {
            self.force_transition(&notify, ConnectionStatus::Failed);
            self.close_in_background();
            return;
        }
        if self.backoff.is_exhausted(attempt) {
            self.fail_exhausted(&notify, attempt, &err);
            self.close_in_background();
            return;
        }

        self.force_transition(&notify, ConnectionStatus::Reconnecting);
        self.arm_reconnect(attempt);
    }

    fn arm_reconnect(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        self.stats.record_reconnect_attempt();
        info!(
            channel = %self.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let this = self.this.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(inner) = this.upgrade() else {
                return;
            };
            if let Err(err) = inner.run_connect_loop().await {
                debug!(channel = %inner.id, error = %err, "Reconnect ended without a connection");
            }
        });
        if let Some(previous) = lock(&self.tasks).reconnect.replace(task) {
            previous.abort();
        }
    }

    fn close_in_background(&self) {
        let driver = Arc::clone(&self.driver);
        let id = self.id;
        tokio::spawn(async move {
            if let Err(err) = driver.close().await {
                debug!(channel = %id, error = %err, "Best-effort close failed");
            }
        });
    }

    // ------------------------------------------------------------------------
    // Heartbeat & Inbound Pump
    // ------------------------------------------------------------------------

    fn start_heartbeat(&self) {
        if !self.config.heartbeat.enabled {
            return;
        }
        let task = HeartbeatMonitor::spawn(self.this.clone(), &self.config.heartbeat);
        if let Some(previous) = lock(&self.tasks).heartbeat.replace(task) {
            previous.abort();
        }
    }

    fn stop_heartbeat(&self) {
        let task = lock(&self.tasks).heartbeat.take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Spawn the inbound pump on first connect
    ///
    /// Events the driver queued before then belong to no connection and are
    /// discarded, frames counting as dropped.
    fn ensure_pump(&self) {
        let Some(mut events) = lock(&self.events).take() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            match event {
                DriverEvent::Frame(frame) => {
                    self.stats.record_inbound_bytes(frame.len());
                    self.stats.record_dropped();
                }
                DriverEvent::Closed { reason } => {
                    debug!(
                        channel = %self.id,
                        %reason,
                        "Discarding closure reported before first connect"
                    );
                }
            }
        }
        let this = self.this.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = this.upgrade() else {
                    break;
                };
                match event {
                    DriverEvent::Frame(frame) => inner.process_frame(&frame),
                    DriverEvent::Closed { reason } => inner.handle_connection_loss(
                        LossCause::TransportClosed,
                        TransportError::closed(reason).into(),
                    ),
                }
            }
        });
        lock(&self.tasks).pump = Some(task);
    }

    fn process_frame(&self, frame: &[u8]) {
        self.stats.record_inbound_bytes(frame.len());
        let status = self.status();
        if status != ConnectionStatus::Connected {
            self.stats.record_dropped();
            debug!(channel = %self.id, %status, "Dropping frame received while not connected");
            return;
        }

        match self.ingress.accept(frame) {
            Ok(message) => {
                self.stats.record_received();
                debug!(
                    channel = %self.id,
                    message_id = %message.id,
                    sender = %message.sender_id,
                    message_type = %message.message_type,
                    "Message received"
                );
                self.handlers.dispatch_message(&message);
            }
            Err(err) => {
                self.stats.record_dropped();
                warn!(channel = %self.id, error = %err, "Dropping inbound frame");
            }
        }
    }
}

impl HeartbeatTarget for ChannelInner {
    fn driver(&self) -> &dyn TransportDriver {
        self.driver.as_ref()
    }

    fn heartbeat_succeeded(&self, rtt: Duration) {
        self.stats.record_heartbeat(rtt);
    }

    fn heartbeat_failed(&self, error: ChannelError) {
        self.handle_connection_loss(LossCause::Heartbeat, error);
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let tasks = match self.tasks.get_mut() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.abort_all();
    }
}

/// Moves the channel to `Disconnected` when dropped, then releases the
/// operation lock it may hold
///
/// A driver close that never completed is finished in the background.
struct DisconnectGuard<'a> {
    inner: &'a ChannelInner,
    closed: bool,
    _op: Option<tokio::sync::MutexGuard<'a, ()>>,
}

impl Drop for DisconnectGuard<'_> {
    fn drop(&mut self) {
        let inner = self.inner;
        inner.stop_heartbeat();
        if !self.closed && Handle::try_current().is_ok() {
            inner.close_in_background();
        }
        let notify = lock(&inner.notify_lock);
        inner.force_transition(&notify, ConnectionStatus::Disconnected);
        info!(channel = %inner.id, "Disconnected");
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
