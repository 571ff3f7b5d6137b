//! Priority queue plus half-duplex request/response matching.
//!
//! The correlator does no I/O and reads no clock: callers pass `now` in,
//! write whatever [`Correlator::poll_transmit`] returns to the transport, and
//! sleep until [`Correlator::next_deadline`].

use std::collections::VecDeque;
use std::sync::Arc;

use avwire_frame::{Frame, FrameCodec, FrameDecoder, FrameEncoder};
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::classifier::{Classifier, StatePatch, Verdict};
use crate::command::{Command, CommandError, CommandHandle, Origin, Reply};
use crate::error::Result;
use crate::lifecycle::Gate;
use crate::queue::{CommandQueue, Pending};

/// Output of the correlator besides wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelatorEvent {
    /// Status carried by an inbound frame.
    Patch(StatePatch),
    /// A command reached a terminal state.
    Resolved {
        name: String,
        origin: Origin,
        success: bool,
    },
}

struct InFlight {
    pending: Pending,
    deadline: Instant,
}

/// Command queue and response matcher for one connection.
pub struct Correlator {
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    classifier: Arc<dyn Classifier>,
    queue: CommandQueue,
    in_flight: Option<InFlight>,
    gate: Gate,
    clear_on_disconnect: bool,
    /// Last transmit or receive, for `delay_before_send`.
    last_io: Option<Instant>,
    /// End of the last resolved command's `delay_after_receive`.
    resume_at: Option<Instant>,
    events: VecDeque<CorrelatorEvent>,
}

impl Correlator {
    pub fn new(codec: FrameCodec, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            encoder: FrameEncoder::new(codec.clone()),
            decoder: FrameDecoder::new(codec),
            classifier,
            queue: CommandQueue::default(),
            in_flight: None,
            gate: Gate::Closed,
            clear_on_disconnect: true,
            last_io: None,
            resume_at: None,
            events: VecDeque::new(),
        }
    }

    /// Whether queued commands are dropped when the link goes down.
    pub fn with_clear_on_disconnect(mut self, clear: bool) -> Self {
        self.clear_on_disconnect = clear;
        self
    }

    pub fn set_clear_on_disconnect(&mut self, clear: bool) {
        self.clear_on_disconnect = clear;
    }

    /// Encode and queue a command.
    ///
    /// Fails only if the body cannot be framed. A replacing command first
    /// aborts everything of its group.
    pub fn enqueue(&mut self, command: Command) -> Result<CommandHandle> {
        let wire = self.encoder.encode(command.payload())?;
        if command.replaces() {
            self.supersede(command.group());
        }
        debug!(
            command = command.name(),
            priority = command.priority().0,
            origin = command.origin().label(),
            queued = self.queue.len() + 1,
            "command queued"
        );
        let (tx, handle) = CommandHandle::channel();
        self.queue.push_back(Pending::new(command, wire, tx));
        Ok(handle)
    }

    /// Next bytes to write, if anything may be sent at `now`.
    ///
    /// Call repeatedly until `None`: commands that do not wait leave the slot
    /// free for the next one.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Bytes> {
        if self.in_flight.is_some() || self.gate == Gate::Closed {
            return None;
        }
        if self.resume_at.is_some_and(|at| now < at) {
            return None;
        }
        let gate = self.gate;
        let next = self.queue.peek_matching(|c| admits(gate, c))?;
        if let Some(last) = self.last_io {
            if now < last + next.delay_before_send() {
                return None;
            }
        }

        let mut pending = self.queue.pop_matching(|c| admits(gate, c))?;
        pending.attempts += 1;
        self.last_io = Some(now);
        let wire = pending.wire.clone();
        debug!(
            command = pending.command.name(),
            attempt = pending.attempts,
            payload = ?pending.command.payload(),
            "transmit"
        );

        if pending.command.wait() {
            let deadline = now + pending.command.timeout();
            self.in_flight = Some(InFlight { pending, deadline });
        } else {
            let attempts = pending.attempts;
            self.resolve(
                pending,
                Ok(Reply {
                    frame: None,
                    attempts,
                }),
            );
        }
        Some(wire)
    }

    /// Feed raw transport bytes.
    pub fn on_bytes_received(&mut self, bytes: &[u8], now: Instant) {
        self.decoder.push(bytes);
        self.last_io = Some(now);
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_frame(frame, now);
        }
    }

    /// Expire the in-flight command if its deadline passed.
    pub fn poll_timeout(&mut self, now: Instant) {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.deadline <= now);
        if !expired {
            return;
        }
        if let Some(in_flight) = self.in_flight.take() {
            warn!(
                command = in_flight.pending.command.name(),
                attempt = in_flight.pending.attempts,
                payload = ?in_flight.pending.command.payload(),
                "command timed out"
            );
            let attempts = in_flight.pending.attempts;
            self.retry_or_fail(in_flight.pending, now, CommandError::Timeout { attempts });
        }
    }

    /// Earliest instant at which `poll_timeout` or `poll_transmit` may have
    /// something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if let Some(in_flight) = &self.in_flight {
            return Some(in_flight.deadline);
        }
        if self.gate == Gate::Closed {
            return None;
        }
        let gate = self.gate;
        let next = self.queue.peek_matching(|c| admits(gate, c))?;
        let spacing = self.last_io.map(|last| last + next.delay_before_send());
        match (spacing, self.resume_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Link is up. Opens the gate fully; the session narrows it while a
    /// handshake runs.
    pub fn on_connected(&mut self) {
        self.decoder.clear();
        self.last_io = None;
        self.resume_at = None;
        self.gate = Gate::Open;
    }

    /// Link is down. The in-flight command is aborted; queued commands are
    /// dropped per policy. Handshake commands and commands already sent
    /// (queued again for a retry) are always dropped: neither is replayed
    /// into the next connection.
    pub fn on_disconnected(&mut self) {
        self.gate = Gate::Closed;
        self.decoder.clear();
        self.resume_at = None;
        if let Some(in_flight) = self.in_flight.take() {
            self.resolve(in_flight.pending, Err(CommandError::Disconnected));
        }
        let clear_all = self.clear_on_disconnect;
        let dropped = self.queue.remove_pending_where(|p| {
            clear_all || p.attempts > 0 || p.command.origin() == &Origin::Handshake
        });
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "queue flushed on disconnect");
        }
        for pending in dropped {
            self.resolve(pending, Err(CommandError::Disconnected));
        }
    }

    /// Abort the in-flight command and every queued one. Returns how many.
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        if let Some(in_flight) = self.in_flight.take() {
            self.resolve(in_flight.pending, Err(CommandError::Cleared));
            cleared += 1;
        }
        for pending in self.queue.drain() {
            self.resolve(pending, Err(CommandError::Cleared));
            cleared += 1;
        }
        cleared
    }

    /// Drop queued commands of one origin without touching the rest.
    ///
    /// Their handles resolve with `error`; no [`CorrelatorEvent::Resolved`]
    /// is emitted for them.
    pub fn discard_origin(&mut self, origin: &Origin, error: CommandError) -> usize {
        let removed = self.queue.remove_where(|c| c.origin() == origin);
        let count = removed.len();
        for mut pending in removed {
            pending.resolve(Err(error.clone()));
        }
        count
    }

    pub fn set_gate(&mut self, gate: Gate) {
        self.gate = gate;
    }

    pub fn gate(&self) -> Gate {
        self.gate
    }

    /// Next event for the session, if any.
    pub fn poll_event(&mut self) -> Option<CorrelatorEvent> {
        self.events.pop_front()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<&Command> {
        self.in_flight.as_ref().map(|f| &f.pending.command)
    }

    /// Whether a command named `name` is waiting to be sent.
    pub fn is_queued(&self, name: &str) -> bool {
        self.queue.contains(|c| c.name() == name)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    /// Corrupt frames discarded so far.
    pub fn checksum_errors(&self) -> u64 {
        self.decoder.checksum_errors()
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        let in_flight = self.in_flight.as_ref().map(|f| &f.pending.command);
        let classification = self.classifier.classify(&frame, in_flight);
        if !classification.patch.is_empty() {
            self.events
                .push_back(CorrelatorEvent::Patch(classification.patch.clone()));
        }

        let Some(in_flight) = self.in_flight.take() else {
            debug!(frame = ?frame.body, "unsolicited frame");
            return;
        };
        let pending = in_flight.pending;
        debug!(
            command = pending.command.name(),
            verdict = classification.verdict.label(),
            frame = ?frame.body,
            "frame classified"
        );

        let reason = classification
            .reason
            .unwrap_or_else(|| classification.verdict.label().to_string());
        match classification.verdict {
            Verdict::Success => {
                let attempts = pending.attempts;
                self.settle(&pending, now);
                self.resolve(
                    pending,
                    Ok(Reply {
                        frame: Some(frame),
                        attempts,
                    }),
                );
            }
            Verdict::Ignore => {
                // The deadline stays where it was.
                self.in_flight = Some(InFlight {
                    pending,
                    deadline: in_flight.deadline,
                });
            }
            Verdict::Retry | Verdict::Failed => {
                warn!(
                    command = pending.command.name(),
                    attempt = pending.attempts,
                    payload = ?pending.command.payload(),
                    frame = ?frame.body,
                    %reason,
                    "device rejected command"
                );
                let attempts = pending.attempts;
                self.retry_or_fail(pending, now, CommandError::Protocol { reason, attempts });
            }
            Verdict::Abort => {
                warn!(
                    command = pending.command.name(),
                    payload = ?pending.command.payload(),
                    frame = ?frame.body,
                    %reason,
                    "command aborted by device"
                );
                self.settle(&pending, now);
                self.resolve(pending, Err(CommandError::Aborted { reason }));
            }
        }
    }

    fn retry_or_fail(&mut self, mut pending: Pending, now: Instant, error: CommandError) {
        self.settle(&pending, now);
        if pending.retries_remaining > 0 {
            pending.retries_remaining -= 1;
            debug!(
                command = pending.command.name(),
                retries_remaining = pending.retries_remaining,
                "command requeued"
            );
            self.queue.push_front(pending);
        } else {
            warn!(command = pending.command.name(), error = %error, "command failed");
            self.resolve(pending, Err(error));
        }
    }

    fn settle(&mut self, pending: &Pending, now: Instant) {
        self.resume_at = Some(now + pending.command.delay_after_receive());
    }

    fn supersede(&mut self, group: &str) {
        if self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.pending.command.group() == group)
        {
            if let Some(in_flight) = self.in_flight.take() {
                debug!(command = in_flight.pending.command.name(), "in-flight command superseded");
                self.resolve(in_flight.pending, Err(CommandError::Superseded));
            }
        }
        for pending in self.queue.remove_where(|c| c.group() == group) {
            debug!(command = pending.command.name(), "queued command superseded");
            self.resolve(pending, Err(CommandError::Superseded));
        }
    }

    fn resolve(&mut self, mut pending: Pending, result: std::result::Result<Reply, CommandError>) {
        self.events.push_back(CorrelatorEvent::Resolved {
            name: pending.command.name().to_string(),
            origin: pending.command.origin().clone(),
            success: result.is_ok(),
        });
        pending.resolve(result);
    }
}

fn admits(gate: Gate, command: &Command) -> bool {
    match gate {
        Gate::Closed => false,
        Gate::HandshakeOnly => command.origin() == &Origin::Handshake,
        Gate::Open => true,
    }
}
