use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use avwire_frame::Frame;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::status::StatusKey;

/// Default time to wait for a matching response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default retry budget after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Dequeue priority. Higher values transmit first; equal values are FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);
    /// Login and mode-set commands replayed on connect.
    pub const HANDSHAKE: Priority = Priority(100);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

/// Who asked for a command. Drives lifecycle and reconciliation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    User,
    Handshake,
    Poll,
    Reconcile(StatusKey),
}

impl Origin {
    pub fn label(&self) -> &'static str {
        match self {
            Origin::User => "user",
            Origin::Handshake => "handshake",
            Origin::Poll => "poll",
            Origin::Reconcile(_) => "reconcile",
        }
    }
}

/// One logical operation to send to the device.
///
/// The payload is the frame body; the connection's codec adds markers,
/// checksum and escaping when the command is queued.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    payload: Bytes,
    priority: Priority,
    wait: bool,
    retries: u32,
    timeout: Duration,
    delay_before_send: Duration,
    delay_after_receive: Duration,
    group: Option<String>,
    replace: bool,
    origin: Origin,
    created_at: Instant,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            priority: Priority::NORMAL,
            wait: true,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            delay_before_send: Duration::ZERO,
            delay_after_receive: Duration::ZERO,
            group: None,
            replace: false,
            origin: Origin::User,
            created_at: Instant::now(),
        }
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// `false` sends without holding the half-duplex slot; the command
    /// resolves as soon as it is on the wire.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum quiet time on the line before this command is sent.
    pub fn with_delay_before_send(mut self, delay: Duration) -> Self {
        self.delay_before_send = delay;
        self
    }

    /// Minimum quiet time after this command resolves before the next send.
    pub fn with_delay_after_receive(mut self, delay: Duration) -> Self {
        self.delay_after_receive = delay;
        self
    }

    /// Share a clear-and-replace group with other commands.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Abort every queued or in-flight command of the same group when this
    /// one is queued.
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn wait(&self) -> bool {
        self.wait
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn delay_before_send(&self) -> Duration {
        self.delay_before_send
    }

    pub fn delay_after_receive(&self) -> Duration {
        self.delay_after_receive
    }

    /// Clear-and-replace group; the command name unless set explicitly.
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.name)
    }

    pub fn replaces(&self) -> bool {
        self.replace
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Successful resolution of a command.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Frame the classifier accepted; `None` for commands that do not wait.
    pub frame: Option<Frame>,
    /// Transmissions made, including the successful one.
    pub attempts: u32,
}

/// Why a command resolved as failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No matching response within the timeout, retries exhausted.
    #[error("no response after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The device rejected the command on every attempt.
    #[error("device rejected command after {attempts} attempt(s): {reason}")]
    Protocol { reason: String, attempts: u32 },

    /// The device rejected the command with a terminal error.
    #[error("command aborted: {reason}")]
    Aborted { reason: String },

    /// A newer command of the same group replaced this one.
    #[error("superseded by a newer command")]
    Superseded,

    /// The connection dropped before the command resolved.
    #[error("connection lost")]
    Disconnected,

    /// The queue was cleared explicitly.
    #[error("queue cleared")]
    Cleared,

    /// The owning session stopped.
    #[error("session closed")]
    SessionClosed,
}

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, CommandError>>;

/// Caller-side view of a queued command. Resolves once the command succeeds,
/// fails or is aborted.
pub struct CommandHandle {
    rx: oneshot::Receiver<Result<Reply, CommandError>>,
}

impl CommandHandle {
    pub(crate) fn channel() -> (ReplySender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Non-blocking check; `None` while the command is still pending.
    pub fn try_result(&mut self) -> Option<Result<Reply, CommandError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CommandError::SessionClosed)),
        }
    }
}

impl Future for CommandHandle {
    type Output = Result<Reply, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(CommandError::SessionClosed)))
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandHandle(..)")
    }
}
