//! Command correlation and state reconciliation for device control protocols.
//!
//! One [`session`] per device link. It owns:
//! - a priority [`queue`] of [`Command`]s, sent one at a time and matched to
//!   replies by a driver-supplied [`Classifier`] ([`correlator`])
//! - the observed/target [`StateStore`] and its change stream
//! - the [`Reconciler`] that re-issues corrective commands until a target is
//!   reached, then leaves the device alone
//! - the connection [`Lifecycle`] with its handshake gate
//!
//! The correlator, reconciler and lifecycle are sans-IO and take `now` as an
//! argument; [`SessionHandle`] wraps them in a tokio task.

pub mod classifier;
pub mod command;
pub mod config;
pub mod correlator;
pub mod error;
pub mod lifecycle;
pub(crate) mod queue;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod store;

pub use classifier::{
    Classification, Classifier, CommandArg, CommandDef, CommandTable, Encoding, EnumTable,
    FnClassifier, Slot, StatePatch, Verdict,
};
pub use command::{
    Command, CommandError, CommandHandle, Origin, Priority, Reply, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT,
};
pub use config::{ConfigSnapshot, SessionConfig};
pub use correlator::{Correlator, CorrelatorEvent};
pub use error::{EngineError, Result};
pub use lifecycle::{ConnectionState, Gate, HandshakeOutcome, Lifecycle};
pub use reconcile::{ReconcileRule, Reconciler, DEFAULT_MAX_REISSUES};
pub use session::{
    spawn_session, transport_channel, CommandBuilder, SessionBuilder, SessionHandle,
    TransportEvents,
};
pub use status::{StatusKey, StatusValue};
pub use store::{StateStore, StatusChange, StatusEntry, StatusRecord};
