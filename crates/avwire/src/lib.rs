//! Transport and state reconciliation engine for AV and building-control
//! device drivers.
//!
//! # Crate Structure
//!
//! - [`transport`]: host transport abstraction (TCP and loopback adapters behind `async`)
//! - [`frame`]: framing, checksums and byte-stuffing
//! - [`engine`]: command correlation, state store, reconciliation and connection lifecycle
//! - [`drivers`]: reference lighting and display drivers (behind `drivers`)

/// Re-export transport types.
pub mod transport {
    pub use avwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use avwire_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use avwire_engine::*;
}

/// Re-export the reference drivers (requires `drivers` feature).
#[cfg(feature = "drivers")]
pub mod drivers {
    pub use avwire_drivers::*;
}
