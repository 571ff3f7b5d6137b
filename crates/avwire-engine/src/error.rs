use std::time::Duration;

use crate::command::CommandError;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] avwire_transport::TransportError),

    /// Frame-level error, e.g. a body that does not fit the framing.
    #[error("frame error: {0}")]
    Frame(#[from] avwire_frame::FrameError),

    /// A command resolved as failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// No command of that name in the driver's command table.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A command table entry rejected its arguments.
    #[error("invalid argument for '{command}': {reason}")]
    InvalidArgument { command: String, reason: String },

    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session task has stopped.
    #[error("session closed")]
    SessionClosed,

    /// Waited too long for the session to answer.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, EngineError>;
