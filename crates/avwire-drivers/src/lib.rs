//! Reference drivers for avwire.
//!
//! Each module supplies a codec, a command table, a classifier and
//! reconciliation rules, and a `session` helper that wires them into an
//! [`avwire_engine::SessionBuilder`].
//!
//! - [`lighting`]: fixed-length binary frames with an XOR checksum
//! - [`display`]: CR-delimited ASCII with a login handshake

pub mod display;
pub mod lighting;

use avwire_frame::CodecProfile;

/// Names accepted by [`profile`].
pub const DRIVERS: &[&str] = &["lighting", "display"];

/// Codec description of a bundled driver.
pub fn profile(driver: &str) -> Option<CodecProfile> {
    match driver {
        "lighting" => Some(lighting::profile()),
        "display" => Some(display::profile()),
        _ => None,
    }
}
