use bytes::BytesMut;
use tracing::warn;

use crate::codec::{Frame, FrameCodec};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Default bound on buffered, not yet framed input: 64 KiB.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Accumulates raw transport chunks and yields complete frames.
///
/// Handles partial reads internally: callers push whatever arrived and pull
/// whole, checksum-valid frames. Corrupt input is logged, counted and
/// skipped.
pub struct FrameDecoder {
    codec: FrameCodec,
    buf: BytesMut,
    max_buffer: usize,
    checksum_errors: u64,
}

impl FrameDecoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_buffer: DEFAULT_MAX_BUFFER,
            checksum_errors: 0,
        }
    }

    /// Discard buffered input once it grows past `max_buffer` bytes without
    /// yielding a frame.
    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer.max(1);
        self
    }

    pub fn max_buffer(&self) -> usize {
        self.max_buffer
    }

    /// Append bytes received from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(None) if self.buf.len() > self.max_buffer => {
                    warn!(
                        discarded = self.buf.len(),
                        max = self.max_buffer,
                        "frame decoder buffer overflow"
                    );
                    self.buf.clear();
                    return None;
                }
                Ok(frame) => return frame,
                Err(err) if err.is_recoverable() => {
                    self.checksum_errors += 1;
                    warn!(error = %err, buffered = self.buf.len(), "discarding corrupt frame");
                }
                Err(err) => {
                    warn!(error = %err, "frame decoder reset");
                    self.buf.clear();
                    return None;
                }
            }
        }
    }

    /// Every frame currently decodable.
    pub fn drain(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Drop buffered partial input, e.g. after the link went down.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Frames discarded as corrupt since creation.
    pub fn checksum_errors(&self) -> u64 {
        self.checksum_errors
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::checksum::Checksum;
    use crate::escape::Escaping;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(
            FrameCodec::delimited(Bytes::from_static(b"\r"))
                .with_checksum(Checksum::Sum8)
                .with_escaping(Escaping::new(0x1B, 0x20, vec![0x0D])),
        )
    }

    fn wire(body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        decoder().codec().encode(body, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn frames_split_across_pushes() {
        let mut decoder = decoder();
        let bytes = [wire(b"POWR=1"), wire(b"INPT=2")].concat();

        let (first, second) = bytes.split_at(4);
        decoder.push(first);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 4);

        decoder.push(second);
        let frames = decoder.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].text(), Some("POWR=1"));
        assert_eq!(frames[1].text(), Some("INPT=2"));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn corrupt_frame_is_skipped_and_counted() {
        let mut decoder = decoder();
        let mut bad = wire(b"POWR=1");
        bad[3] ^= 0x01;
        decoder.push(&bad);
        decoder.push(&wire(b"POWR=0"));

        let frames = decoder.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].text(), Some("POWR=0"));
        assert_eq!(decoder.checksum_errors(), 1);
    }

    #[test]
    fn unframed_noise_past_max_buffer_is_discarded() {
        let codec = FrameCodec::delimited(Bytes::from_static(b"\r")).with_max_frame(1 << 20);
        let mut decoder = FrameDecoder::new(codec).with_max_buffer(16);

        decoder.push(&[b'x'; 12]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 12);

        decoder.push(&[b'x'; 12]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);

        decoder.push(b"OK\r");
        assert_eq!(decoder.next_frame().unwrap().text(), Some("OK"));
    }

    #[test]
    fn clear_drops_partial_input() {
        let mut decoder = decoder();
        decoder.push(b"POW");
        decoder.clear();
        decoder.push(&wire(b"OK"));
        assert_eq!(decoder.next_frame().unwrap().text(), Some("OK"));
    }
}
