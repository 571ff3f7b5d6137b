//! Host transport abstraction for device protocol sessions.
//!
//! The engine never owns a socket. A host hands it something that implements
//! [`Transport`] for the outbound half and feeds it [`TransportEvent`]s for the
//! inbound half (connection transitions and raw data).
//!
//! This is the lowest layer of avwire. With the `async` feature, two tokio
//! adapters are provided:
//! - [`TcpTransport`] for networked devices and serial-over-IP gateways
//! - [`ChannelTransport`] for in-process loopback and tests

pub mod error;
pub mod traits;

#[cfg(feature = "async")]
pub mod channel;
#[cfg(feature = "async")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent};

#[cfg(feature = "async")]
pub use channel::ChannelTransport;
#[cfg(feature = "async")]
pub use tcp::{TcpConfig, TcpTransport};
