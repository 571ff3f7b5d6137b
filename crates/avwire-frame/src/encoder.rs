use bytes::{Bytes, BytesMut};

use crate::codec::FrameCodec;
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Turns message bodies into wire-ready byte chunks.
pub struct FrameEncoder {
    codec: FrameCodec,
    buf: BytesMut,
}

impl FrameEncoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode one body into a single chunk for the transport.
    pub fn encode(&mut self, body: &[u8]) -> Result<Bytes> {
        self.buf.clear();
        self.codec.encode(body, &mut self.buf)?;
        Ok(self.buf.split().freeze())
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::codec::Framing;
    use crate::error::FrameError;

    #[test]
    fn encodes_lighting_off() {
        let codec = FrameCodec::new(Framing::FixedLength {
            indicator: Bytes::from_static(&[0x05]),
            length: 5,
        })
        .with_checksum(Checksum::Xor);
        let mut encoder = FrameEncoder::new(codec);

        let on = encoder.encode(&[0x38, 0x00, 0x79, 0x05]).unwrap();
        let off = encoder.encode(&[0x38, 0x00, 0x01, 0x05]).unwrap();
        assert_eq!(on.as_ref(), &[0x05, 0x38, 0x00, 0x79, 0x05, 0x41]);
        assert_eq!(off.as_ref(), &[0x05, 0x38, 0x00, 0x01, 0x05, 0x39]);
    }

    #[test]
    fn oversize_is_rejected() {
        let codec = FrameCodec::delimited(Bytes::from_static(b"\r")).with_max_frame(4);
        let mut encoder = FrameEncoder::new(codec);
        let err = encoder.encode(b"TOOLONG").unwrap_err();
        assert!(matches!(err, FrameError::Oversize { size: 8, max: 4 }));
    }
}
