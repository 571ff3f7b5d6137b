//! Per-connection actor owning the correlator, state store, reconciler and
//! lifecycle.
//!
//! One tokio task per device link. Callers talk to it through a cloneable
//! [`SessionHandle`]; the host feeds [`TransportEvent`]s in through an
//! unbounded channel.

use std::sync::Arc;
use std::time::Duration;

use avwire_frame::FrameCodec;
use avwire_transport::{Transport, TransportEvent};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::command::{Command, CommandError, CommandHandle, Origin, Reply};
use crate::config::{ConfigSnapshot, SessionConfig};
use crate::correlator::{Correlator, CorrelatorEvent};
use crate::error::{EngineError, Result};
use crate::lifecycle::{ConnectionState, Gate, HandshakeOutcome, Lifecycle};
use crate::reconcile::{ReconcileRule, Reconciler};
use crate::status::{StatusKey, StatusValue};
use crate::store::{StateStore, StatusChange, StatusEntry, StatusRecord};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Wake-up used when no timer is armed.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// Builds commands from the current device settings (handshake, polls).
pub type CommandBuilder = Arc<dyn Fn(&ConfigSnapshot) -> Vec<Command> + Send + Sync>;

/// Sender half the host uses to report transport activity.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Channel pair for hosts that drive the transport themselves.
pub fn transport_channel() -> (TransportEvents, mpsc::UnboundedReceiver<TransportEvent>) {
    mpsc::unbounded_channel()
}

/// Everything a session needs besides the transport.
pub struct SessionBuilder {
    codec: FrameCodec,
    classifier: Arc<dyn Classifier>,
    config: SessionConfig,
    snapshot: ConfigSnapshot,
    handshake: Option<CommandBuilder>,
    polls: Option<CommandBuilder>,
    rules: Vec<ReconcileRule>,
}

impl SessionBuilder {
    pub fn new(codec: FrameCodec, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            codec,
            classifier,
            config: SessionConfig::default(),
            snapshot: ConfigSnapshot::default(),
            handshake: None,
            polls: None,
            rules: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_snapshot(mut self, snapshot: ConfigSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Commands replayed on every connect before ordinary traffic flows.
    pub fn with_handshake<F>(mut self, handshake: F) -> Self
    where
        F: Fn(&ConfigSnapshot) -> Vec<Command> + Send + Sync + 'static,
    {
        self.handshake = Some(Arc::new(handshake));
        self
    }

    /// Status queries sent every poll interval while connected.
    pub fn with_polls<F>(mut self, polls: F) -> Self
    where
        F: Fn(&ConfigSnapshot) -> Vec<Command> + Send + Sync + 'static,
    {
        self.polls = Some(Arc::new(polls));
        self
    }

    pub fn with_rule(mut self, rule: ReconcileRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = ReconcileRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Spawn the session task. Must be called from within a tokio runtime.
    pub fn spawn<T>(
        self,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<SessionHandle>
    where
        T: Transport + 'static,
    {
        spawn_session(self, Arc::new(transport), events)
    }
}

/// Spawn one session task for one device link.
pub fn spawn_session(
    builder: SessionBuilder,
    transport: Arc<dyn Transport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> Result<SessionHandle> {
    builder.config.validate()?;
    builder.codec.validate()?;

    let SessionBuilder {
        codec,
        classifier,
        config,
        snapshot,
        handshake,
        polls,
        rules,
    } = builder;

    let (status_tx, _) = broadcast::channel(config.event_capacity);
    let mut reconciler = Reconciler::new();
    for rule in rules {
        reconciler.add_rule(rule);
    }

    let session = Session {
        correlator: Correlator::new(codec, classifier)
            .with_clear_on_disconnect(config.clear_queue_on_disconnect),
        store: StateStore::with_sender(status_tx.clone()),
        reconciler,
        lifecycle: Lifecycle::new(config.max_handshake_failures),
        transport,
        snapshot,
        handshake,
        polls,
        restart_timers: false,
        config: config.clone(),
    };

    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    tokio::spawn(session.run(requests_rx, transport_events, cancel.clone()));

    Ok(SessionHandle {
        requests: requests_tx,
        status: status_tx,
        cancel,
        request_timeout: config.request_timeout,
    })
}

enum Request {
    Enqueue {
        command: Command,
        reply: oneshot::Sender<Result<CommandHandle>>,
    },
    SetTarget {
        key: StatusKey,
        value: StatusValue,
        reply: oneshot::Sender<()>,
    },
    Status {
        key: StatusKey,
        reply: oneshot::Sender<Option<StatusEntry>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<StatusRecord>>,
    },
    UpdateConfig {
        snapshot: ConfigSnapshot,
        reply: oneshot::Sender<()>,
    },
    ClearQueue {
        reply: oneshot::Sender<usize>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    status: broadcast::Sender<StatusChange>,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl SessionHandle {
    /// Queue a command. The returned handle resolves when the command does.
    pub async fn enqueue(&self, command: Command) -> Result<CommandHandle> {
        self.request(|reply| Request::Enqueue { command, reply })
            .await?
    }

    /// Queue a command and wait for its outcome.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        let handle = self.enqueue(command).await?;
        Ok(handle.await?)
    }

    /// Request a status value; the reconciliation loop drives the device
    /// toward it.
    pub async fn set_target(&self, key: StatusKey, value: impl Into<StatusValue>) -> Result<()> {
        let value = value.into();
        self.request(|reply| Request::SetTarget { key, value, reply })
            .await
    }

    pub async fn status(&self, key: StatusKey) -> Result<Option<StatusEntry>> {
        self.request(|reply| Request::Status { key, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<StatusRecord>> {
        self.request(|reply| Request::Snapshot { reply }).await
    }

    /// Status change stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.status.subscribe()
    }

    /// Replace the device settings. Takes effect at the next handshake/poll.
    pub async fn update_config(&self, snapshot: ConfigSnapshot) -> Result<()> {
        self.request(|reply| Request::UpdateConfig { snapshot, reply })
            .await
    }

    /// Abort every queued and in-flight command. Returns how many.
    pub async fn clear_queue(&self) -> Result<usize> {
        self.request(|reply| Request::ClearQueue { reply }).await
    }

    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(|reply| Request::State { reply }).await
    }

    /// Stop the session. Pending commands resolve with
    /// [`CommandError::SessionClosed`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Wait until the session task has stopped.
    pub async fn closed(&self) {
        self.requests.closed().await;
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| EngineError::SessionClosed)?;
        tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| EngineError::Timeout(self.request_timeout))?
            .map_err(|_| EngineError::SessionClosed)
    }
}

struct Session {
    correlator: Correlator,
    store: StateStore,
    reconciler: Reconciler,
    lifecycle: Lifecycle,
    transport: Arc<dyn Transport>,
    snapshot: ConfigSnapshot,
    handshake: Option<CommandBuilder>,
    polls: Option<CommandBuilder>,
    /// Set when the link became connected; the loop restarts its timers.
    restart_timers: bool,
    config: SessionConfig,
}

impl Session {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        let start = Instant::now();
        let mut poll_timer = self.config.poll_interval.map(|period| timer(start, period));
        let mut reconcile_timer = timer(start, self.config.reconcile_interval);
        let mut transport_open = true;
        info!(transport = self.transport.transport_name(), "session started");

        loop {
            self.pump(Instant::now());
            if std::mem::take(&mut self.restart_timers) {
                if let Some(poll) = poll_timer.as_mut() {
                    poll.reset();
                }
                reconcile_timer.reset();
            }

            let wake = self.next_deadline();
            let connected = self.lifecycle.is_connected();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("session cancelled");
                    break;
                }

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("all session handles dropped");
                        break;
                    }
                },

                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport(event),
                    None => {
                        warn!("transport event channel closed");
                        transport_open = false;
                        self.handle_transport(TransportEvent::Disconnected);
                    }
                },

                _ = sleep_until(wake.unwrap_or_else(|| Instant::now() + IDLE_WAKE)), if wake.is_some() => {
                    self.on_deadline(Instant::now());
                }

                _ = tick(&mut poll_timer), if connected && poll_timer.is_some() => {
                    self.enqueue_polls();
                }

                _ = reconcile_timer.tick(), if connected => {
                    self.reconcile(Instant::now());
                }
            }
        }

        info!(
            queued = self.correlator.queued(),
            "session stopped"
        );
        // Dropping the correlator resolves every outstanding handle with
        // `SessionClosed`.
    }

    /// Transmit whatever may go out and route correlator events until
    /// nothing changes.
    fn pump(&mut self, now: Instant) {
        loop {
            let mut progressed = false;
            while let Some(bytes) = self.correlator.poll_transmit(now) {
                progressed = true;
                if let Err(err) = self.transport.send(bytes) {
                    error!(error = %err, transport = self.transport.transport_name(), "transport send failed");
                }
            }
            while let Some(event) = self.correlator.poll_event() {
                progressed = true;
                self.handle_correlator_event(event, now);
            }
            if !progressed {
                break;
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let correlator = self.correlator.next_deadline();
        let settle = if self.lifecycle.is_connected() {
            self.reconciler.next_deadline()
        } else {
            None
        };
        match (correlator, settle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_deadline(&mut self, now: Instant) {
        self.correlator.poll_timeout(now);
        if self
            .reconciler
            .next_deadline()
            .is_some_and(|deadline| deadline <= now)
        {
            self.reconcile(now);
        }
    }

    fn handle_request(&mut self, request: Request) {
        let now = Instant::now();
        match request {
            Request::Enqueue { command, reply } => {
                let _ = reply.send(self.correlator.enqueue(command));
            }
            Request::SetTarget { key, value, reply } => {
                self.store.set_target(key, value);
                self.reconcile(now);
                let _ = reply.send(());
            }
            Request::Status { key, reply } => {
                let _ = reply.send(self.store.entry(&key).cloned());
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            Request::UpdateConfig { snapshot, reply } => {
                debug!(?snapshot, "device config updated");
                self.snapshot = snapshot;
                let _ = reply.send(());
            }
            Request::ClearQueue { reply } => {
                let cleared = self.correlator.clear();
                debug!(cleared, "queue cleared");
                let _ = reply.send(cleared);
            }
            Request::State { reply } => {
                let _ = reply.send(self.lifecycle.state());
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let now = Instant::now();
        match event {
            TransportEvent::Connecting => {
                self.lifecycle.on_connecting();
                self.store.publish_connection(ConnectionState::Connecting);
            }
            TransportEvent::Connected => {
                self.correlator.on_connected();
                let queued = self.start_handshake();
                match self.lifecycle.on_transport_connected(queued) {
                    ConnectionState::Connected => self.connection_complete(now),
                    state => {
                        self.correlator.set_gate(Gate::HandshakeOnly);
                        self.store.publish_connection(state);
                    }
                }
            }
            TransportEvent::Data(bytes) => {
                self.correlator.on_bytes_received(&bytes, now);
            }
            TransportEvent::Disconnected => {
                // Queued commands survive failed connection attempts; only a
                // link that was up flushes them.
                if self.correlator.gate() != Gate::Closed {
                    self.correlator.on_disconnected();
                    self.reconciler.on_disconnected();
                }
                self.store.set_authoritative(false);
                if self.lifecycle.on_disconnected() {
                    info!("device disconnected");
                    self.store.publish_connection(ConnectionState::Disconnected);
                }
            }
        }
    }

    fn handle_correlator_event(&mut self, event: CorrelatorEvent, now: Instant) {
        match event {
            CorrelatorEvent::Patch(patch) => {
                self.store.apply(patch);
            }
            CorrelatorEvent::Resolved {
                origin: Origin::Handshake,
                success,
                name,
            } => match self.lifecycle.on_handshake_resolved(success) {
                HandshakeOutcome::Pending => {}
                HandshakeOutcome::Complete => self.connection_complete(now),
                HandshakeOutcome::Failed { failures, give_up } => {
                    self.correlator.discard_origin(
                        &Origin::Handshake,
                        CommandError::Aborted {
                            reason: format!("handshake command '{name}' failed"),
                        },
                    );
                    if give_up {
                        warn!(failures, "handshake failure limit reached, dropping link");
                        self.transport.disconnect();
                    } else {
                        let queued = self.start_handshake();
                        self.lifecycle.restart_handshake(queued);
                        if self.lifecycle.is_connected() {
                            self.connection_complete(now);
                        }
                    }
                }
            },
            CorrelatorEvent::Resolved {
                origin: Origin::Reconcile(key),
                ..
            } => {
                self.reconciler.on_corrective_resolved(&key, now);
                self.reconcile(now);
            }
            CorrelatorEvent::Resolved { .. } => self.reconcile(now),
        }
    }

    /// Queue the handshake built from the current settings. Returns how many
    /// commands were queued.
    fn start_handshake(&mut self) -> usize {
        let Some(builder) = &self.handshake else {
            return 0;
        };
        let mut queued = 0;
        for command in builder(&self.snapshot) {
            let name = command.name().to_string();
            match self.correlator.enqueue(command.with_origin(Origin::Handshake)) {
                Ok(_) => queued += 1,
                Err(err) => error!(command = %name, error = %err, "handshake command rejected"),
            }
        }
        queued
    }

    fn connection_complete(&mut self, now: Instant) {
        self.correlator.set_gate(Gate::Open);
        self.store.set_authoritative(true);
        self.store.publish_connection(ConnectionState::Connected);
        self.restart_timers = true;
        self.enqueue_polls();
        self.reconcile(now);
    }

    fn enqueue_polls(&mut self) {
        let Some(builder) = &self.polls else {
            return;
        };
        for command in builder(&self.snapshot) {
            if self.correlator.is_queued(command.name()) {
                debug!(command = command.name(), "poll already queued");
                continue;
            }
            let name = command.name().to_string();
            if let Err(err) = self.correlator.enqueue(command.with_origin(Origin::Poll)) {
                error!(command = %name, error = %err, "poll command rejected");
            }
        }
    }

    fn reconcile(&mut self, now: Instant) {
        if !self.lifecycle.is_connected() {
            return;
        }
        for command in self.reconciler.reconcile(now, &mut self.store) {
            let origin = command.origin().clone();
            if let Err(err) = self.correlator.enqueue(command) {
                error!(error = %err, "corrective command rejected");
                if let Origin::Reconcile(key) = origin {
                    self.reconciler.on_corrective_resolved(&key, now);
                }
            }
        }
    }
}

fn timer(start: Instant, period: Duration) -> Interval {
    let mut interval = interval_at(start + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
