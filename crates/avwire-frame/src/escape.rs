//! Byte-stuffing of reserved control bytes.
//!
//! A reserved byte `b` inside a frame is sent as `[escape, b + delta]` so it
//! can never be mistaken for a frame marker. The escape byte itself is always
//! treated as reserved.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Byte-stuffing rule for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Escaping {
    /// Marker announcing that the next byte is escaped.
    pub escape: u8,
    /// Offset added to an escaped byte on encode and removed on decode.
    pub delta: u8,
    /// Control bytes that must never appear literally inside a frame.
    pub reserved: Vec<u8>,
}

impl Escaping {
    pub fn new(escape: u8, delta: u8, reserved: impl Into<Vec<u8>>) -> Self {
        Self {
            escape,
            delta,
            reserved: reserved.into(),
        }
    }

    /// Whether `byte` must be escaped.
    pub fn is_reserved(&self, byte: u8) -> bool {
        byte == self.escape || self.reserved.contains(&byte)
    }

    /// Reject rules that could not be reversed unambiguously.
    pub fn validate(&self) -> Result<()> {
        if self.delta == 0 {
            return Err(FrameError::InvalidConfig(
                "escape delta must be non-zero".to_string(),
            ));
        }
        let escaped_reserved = self
            .reserved
            .iter()
            .chain(std::iter::once(&self.escape))
            .map(|b| b.wrapping_add(self.delta))
            .find(|b| self.is_reserved(*b));
        if let Some(byte) = escaped_reserved {
            return Err(FrameError::InvalidConfig(format!(
                "escaped form 0x{byte:02X} collides with a reserved byte"
            )));
        }
        Ok(())
    }
}

/// Escape `src` into `dst`.
pub fn escape(src: &[u8], escaping: &Escaping, dst: &mut BytesMut) {
    dst.reserve(src.len());
    for &byte in src {
        if escaping.is_reserved(byte) {
            dst.put_u8(escaping.escape);
            dst.put_u8(byte.wrapping_add(escaping.delta));
        } else {
            dst.put_u8(byte);
        }
    }
}

/// Reverse [`escape`] over a complete frame body.
pub fn unescape(src: &[u8], escaping: &Escaping) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut bytes = src.iter();
    while let Some(&byte) = bytes.next() {
        if byte == escaping.escape {
            let next = bytes.next().ok_or(FrameError::DanglingEscape)?;
            out.push(next.wrapping_sub(escaping.delta));
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

pub(crate) fn escape_into(src: &[u8], escaping: Option<&Escaping>, dst: &mut BytesMut) {
    match escaping {
        Some(escaping) => escape(src, escaping, dst),
        None => dst.put_slice(src),
    }
}

pub(crate) fn unescape_all(src: &[u8], escaping: Option<&Escaping>) -> Result<Vec<u8>> {
    match escaping {
        Some(escaping) => unescape(src, escaping),
        None => Ok(src.to_vec()),
    }
}

/// Unescape until `want` bytes are produced.
///
/// Returns the bytes and the number of raw bytes consumed, or `None` if `src`
/// runs out first (including a trailing escape marker with no lookahead yet).
pub(crate) fn unescape_prefix(
    src: &[u8],
    escaping: Option<&Escaping>,
    want: usize,
) -> Option<(Vec<u8>, usize)> {
    let Some(escaping) = escaping else {
        return (src.len() >= want).then(|| (src[..want].to_vec(), want));
    };

    let mut out = Vec::with_capacity(want);
    let mut pos = 0;
    while out.len() < want {
        let byte = *src.get(pos)?;
        if byte == escaping.escape {
            let next = *src.get(pos + 1)?;
            out.push(next.wrapping_sub(escaping.delta));
            pos += 2;
        } else {
            out.push(byte);
            pos += 1;
        }
    }
    Some((out, pos))
}

/// Everything decodable so far, with the raw offset just past each output byte.
pub(crate) struct Unescaped {
    pub(crate) bytes: Vec<u8>,
    ends: Vec<usize>,
}

impl Unescaped {
    /// Raw bytes spanned by the first `count` unescaped bytes.
    pub(crate) fn raw_len(&self, count: usize) -> usize {
        match count {
            0 => 0,
            n => self.ends[n - 1],
        }
    }
}

pub(crate) fn unescape_available(src: &[u8], escaping: Option<&Escaping>) -> Unescaped {
    let Some(escaping) = escaping else {
        return Unescaped {
            bytes: src.to_vec(),
            ends: (1..=src.len()).collect(),
        };
    };

    let mut bytes = Vec::with_capacity(src.len());
    let mut ends = Vec::with_capacity(src.len());
    let mut pos = 0;
    while pos < src.len() {
        if src[pos] == escaping.escape {
            let Some(&next) = src.get(pos + 1) else {
                break;
            };
            bytes.push(next.wrapping_sub(escaping.delta));
            pos += 2;
        } else {
            bytes.push(src[pos]);
            pos += 1;
        }
        ends.push(pos);
    }
    Unescaped { bytes, ends }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stx_etx() -> Escaping {
        // STX/ETX framed serial protocol, ESC = 0x1B, offset 0x20.
        Escaping::new(0x1B, 0x20, vec![0x02, 0x03])
    }

    #[test]
    fn reserved_only_payload_roundtrips() {
        let escaping = stx_etx();
        let payload = [0x02, 0x03, 0x1B, 0x1B, 0x02, 0x03, 0x03];

        let mut wire = BytesMut::new();
        escape(&payload, &escaping, &mut wire);

        assert_eq!(wire.len(), payload.len() * 2);
        assert!(!wire.iter().any(|b| *b == 0x02 || *b == 0x03));
        assert_eq!(unescape(&wire, &escaping).unwrap(), payload);
    }

    #[test]
    fn plain_bytes_pass_through() {
        let escaping = stx_etx();
        let mut wire = BytesMut::new();
        escape(b"POWR 1", &escaping, &mut wire);
        assert_eq!(wire.as_ref(), b"POWR 1");
    }

    #[test]
    fn dangling_escape_is_an_error() {
        let escaping = stx_etx();
        let err = unescape(&[0x41, 0x1B], &escaping).unwrap_err();
        assert!(matches!(err, FrameError::DanglingEscape));
    }

    #[test]
    fn prefix_waits_for_lookahead() {
        let escaping = stx_etx();
        assert!(unescape_prefix(&[0x41, 0x1B], Some(&escaping), 2).is_none());

        let (bytes, consumed) = unescape_prefix(&[0x41, 0x1B, 0x22, 0x44], Some(&escaping), 2).unwrap();
        assert_eq!(bytes, vec![0x41, 0x02]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn available_tracks_raw_offsets() {
        let escaping = stx_etx();
        let available = unescape_available(&[0x41, 0x1B, 0x23, 0x44, 0x1B], Some(&escaping));
        assert_eq!(available.bytes, vec![0x41, 0x03, 0x44]);
        assert_eq!(available.raw_len(1), 1);
        assert_eq!(available.raw_len(2), 3);
        assert_eq!(available.raw_len(3), 4);
    }

    #[test]
    fn validate_rejects_colliding_delta() {
        let escaping = Escaping::new(0x10, 0x01, vec![0x0F]);
        assert!(escaping.validate().is_err());
        assert!(Escaping::new(0x10, 0x00, vec![0x02]).validate().is_err());
        assert!(stx_etx().validate().is_ok());
    }
}
