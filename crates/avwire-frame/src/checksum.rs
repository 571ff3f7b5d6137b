use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Integrity check appended to every frame body.
///
/// The checksum covers the frame indicator (if the framing has one) and the
/// unescaped body. It never covers the delimiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checksum {
    /// No trailer.
    #[default]
    None,
    /// One byte: XOR of every covered byte.
    Xor,
    /// One byte `c` such that the 8-bit sum of the covered bytes plus `c` is zero.
    Sum8,
    /// Two bytes: covered byte count (mod 256), then XOR of the covered bytes
    /// and that count. Verification checks both halves.
    Bcc,
}

impl Checksum {
    /// Number of trailer bytes this scheme appends.
    pub fn len(self) -> usize {
        match self {
            Checksum::None => 0,
            Checksum::Xor | Checksum::Sum8 => 1,
            Checksum::Bcc => 2,
        }
    }

    /// Whether this scheme appends nothing.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Scheme name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Checksum::None => "none",
            Checksum::Xor => "xor",
            Checksum::Sum8 => "sum8",
            Checksum::Bcc => "bcc",
        }
    }

    /// Compute the trailer for `covered`.
    pub fn compute(self, covered: &[u8]) -> Vec<u8> {
        match self {
            Checksum::None => Vec::new(),
            Checksum::Xor => vec![xor(covered)],
            Checksum::Sum8 => vec![0u8.wrapping_sub(sum(covered))],
            Checksum::Bcc => {
                let count = covered.len() as u8;
                vec![count, xor(covered) ^ count]
            }
        }
    }

    /// Check `trailer` against `covered`.
    pub fn verify(self, covered: &[u8], trailer: &[u8]) -> Result<()> {
        let ok = match self {
            Checksum::None => trailer.is_empty(),
            Checksum::Xor => trailer == [xor(covered)],
            Checksum::Sum8 => {
                trailer.len() == 1 && sum(covered).wrapping_add(trailer[0]) == 0
            }
            Checksum::Bcc => match trailer {
                [count, check] => *count == covered.len() as u8 && xor(covered) ^ count == *check,
                _ => false,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(FrameError::Checksum {
                scheme: self.name(),
                expected: self.compute(covered),
                actual: trailer.to_vec(),
            })
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Checksum {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Checksum::None),
            "xor" => Ok(Checksum::Xor),
            "sum8" | "sum" => Ok(Checksum::Sum8),
            "bcc" => Ok(Checksum::Bcc),
            other => Err(FrameError::InvalidConfig(format!(
                "unknown checksum scheme '{other}'"
            ))),
        }
    }
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
