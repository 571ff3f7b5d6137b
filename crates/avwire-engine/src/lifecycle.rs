use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default number of failed handshake attempts before the link is dropped.
pub const DEFAULT_MAX_HANDSHAKE_FAILURES: u32 = 3;

/// Connection state of one device link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Transport opening or handshake in progress.
    Connecting,
    /// Handshake done; ordinary commands flow.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// Which queued commands the correlator may transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Nothing goes out.
    Closed,
    /// Only handshake commands go out.
    HandshakeOnly,
    /// Everything goes out.
    Open,
}

/// What the session must do after a handshake command resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// More handshake commands outstanding.
    Pending,
    /// Handshake finished; the link is now connected.
    Complete,
    /// A handshake command failed. `give_up` means the failure budget is spent
    /// and the transport should be dropped; otherwise replay the handshake.
    Failed { failures: u32, give_up: bool },
}

/// Connection state machine: transitions, handshake progress, failure counting.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    gate: Gate,
    handshake_pending: usize,
    handshake_failures: u32,
    max_handshake_failures: u32,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HANDSHAKE_FAILURES)
    }
}

impl Lifecycle {
    pub fn new(max_handshake_failures: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            gate: Gate::Closed,
            handshake_pending: 0,
            handshake_failures: 0,
            max_handshake_failures: max_handshake_failures.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn gate(&self) -> Gate {
        self.gate
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn handshake_failures(&self) -> u32 {
        self.handshake_failures
    }

    pub fn set_max_handshake_failures(&mut self, max: u32) {
        self.max_handshake_failures = max.max(1);
    }

    /// Transport started opening.
    pub fn on_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.gate = Gate::Closed;
        self.handshake_pending = 0;
    }

    /// Transport is open and `handshake_len` handshake commands were queued.
    /// Returns the new state.
    pub fn on_transport_connected(&mut self, handshake_len: usize) -> ConnectionState {
        if handshake_len == 0 {
            self.complete();
        } else {
            debug!(commands = handshake_len, "handshake started");
            self.state = ConnectionState::Connecting;
            self.gate = Gate::HandshakeOnly;
            self.handshake_pending = handshake_len;
        }
        self.state
    }

    /// A handshake command resolved.
    pub fn on_handshake_resolved(&mut self, ok: bool) -> HandshakeOutcome {
        if self.gate != Gate::HandshakeOnly {
            return HandshakeOutcome::Pending;
        }
        if !ok {
            self.handshake_failures += 1;
            self.handshake_pending = 0;
            let give_up = self.handshake_failures >= self.max_handshake_failures;
            warn!(
                failures = self.handshake_failures,
                max = self.max_handshake_failures,
                give_up,
                "handshake failed"
            );
            return HandshakeOutcome::Failed {
                failures: self.handshake_failures,
                give_up,
            };
        }
        self.handshake_pending = self.handshake_pending.saturating_sub(1);
        if self.handshake_pending == 0 {
            self.complete();
            HandshakeOutcome::Complete
        } else {
            HandshakeOutcome::Pending
        }
    }

    /// Handshake commands were queued again after a failure.
    pub fn restart_handshake(&mut self, handshake_len: usize) {
        self.handshake_pending = handshake_len;
        if handshake_len == 0 {
            self.complete();
        }
    }

    /// Transport went down. Returns `false` if it already was.
    pub fn on_disconnected(&mut self) -> bool {
        let was = self.state;
        self.state = ConnectionState::Disconnected;
        self.gate = Gate::Closed;
        self.handshake_pending = 0;
        was != ConnectionState::Disconnected
    }

    fn complete(&mut self) {
        info!("device connected");
        self.state = ConnectionState::Connected;
        self.gate = Gate::Open;
        self.handshake_pending = 0;
        self.handshake_failures = 0;
    }
}
