use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{Frame, FrameCodec};
use crate::error::FrameError;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        // An error would end the FramedRead stream, so corrupt frames are
        // skipped here instead of surfaced.
        loop {
            match FrameCodec::decode(self, src) {
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "discarding corrupt frame");
                }
                other => return other,
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        FrameCodec::encode(self, &body, dst)
    }
}

impl<'a> Encoder<&'a [u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, body: &'a [u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        FrameCodec::encode(self, body, dst)
    }
}
