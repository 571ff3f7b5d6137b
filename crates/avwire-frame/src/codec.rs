use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksum::Checksum;
use crate::error::{FrameError, Result};
use crate::escape::{self, Escaping};

/// Default maximum frame size: 4 KiB. Control frames are rarely over 100 bytes.
pub const DEFAULT_MAX_FRAME: usize = 4 * 1024;

/// One complete, checksum-validated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Exact bytes taken off the wire, markers included.
    pub raw: Bytes,
    /// Unescaped body without indicator, checksum or delimiter.
    pub body: Bytes,
    /// Checksum trailer as received (empty when the codec has none).
    pub checksum: Bytes,
}

impl Frame {
    /// Create a frame from a body alone (no markers, no checksum).
    pub fn new(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            raw: body.clone(),
            body,
            checksum: Bytes::new(),
        }
    }

    /// First body byte, the command id of most binary protocols.
    pub fn opcode(&self) -> Option<u8> {
        self.body.first().copied()
    }

    /// Body as text, for ASCII protocols.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Bytes this frame occupied on the wire.
    pub fn wire_size(&self) -> usize {
        self.raw.len()
    }
}

/// Answer of a [`LengthRule`] for the bytes accumulated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Not enough header bytes yet.
    NeedMoreData,
    /// The frame occupies exactly this many (unescaped) bytes, checksum included.
    Total(usize),
}

/// Width and byte order of a header length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldWidth {
    U8,
    U16Be,
    U16Le,
}

impl FieldWidth {
    fn size(self) -> usize {
        match self {
            FieldWidth::U8 => 1,
            FieldWidth::U16Be | FieldWidth::U16Le => 2,
        }
    }

    fn read(self, bytes: &[u8]) -> usize {
        match self {
            FieldWidth::U8 => bytes[0] as usize,
            FieldWidth::U16Be => u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
            FieldWidth::U16Le => u16::from_le_bytes([bytes[0], bytes[1]]) as usize,
        }
    }
}

/// Predicate deciding the total length of a length-prefixed frame.
#[derive(Clone)]
pub struct LengthRule(Arc<dyn Fn(&[u8]) -> FrameLength + Send + Sync>);

impl LengthRule {
    /// Wrap an arbitrary predicate over the accumulated, unescaped bytes.
    pub fn new<F>(rule: F) -> Self
    where
        F: Fn(&[u8]) -> FrameLength + Send + Sync + 'static,
    {
        Self(Arc::new(rule))
    }

    /// Fixed-size header carrying the body length at `offset`.
    ///
    /// Total length = `header_len` + field value + `trailer_len` (checksum and
    /// any fixed footer).
    pub fn header_field(
        header_len: usize,
        offset: usize,
        width: FieldWidth,
        trailer_len: usize,
    ) -> Self {
        let needed = header_len.max(offset + width.size());
        Self::new(move |buf| {
            if buf.len() < needed {
                return FrameLength::NeedMoreData;
            }
            let body_len = width.read(&buf[offset..offset + width.size()]);
            FrameLength::Total(header_len + body_len + trailer_len)
        })
    }

    pub fn frame_length(&self, buf: &[u8]) -> FrameLength {
        (self.0)(buf)
    }
}

impl fmt::Debug for LengthRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LengthRule(..)")
    }
}

/// How frame boundaries are found in the byte stream.
#[derive(Debug, Clone)]
pub enum Framing {
    /// Body runs up to `delimiter`.
    Delimited { delimiter: Bytes },
    /// Frame starts at `indicator` and runs up to `delimiter`. Anything before
    /// the indicator is line noise.
    IndicatorDelimited { indicator: Bytes, delimiter: Bytes },
    /// `indicator` followed by exactly `length` unescaped bytes, checksum included.
    FixedLength { indicator: Bytes, length: usize },
    /// Length decided by a predicate over the accumulated bytes.
    LengthPrefixed { rule: LengthRule },
}

impl Framing {
    /// Leading marker, empty when the framing has none.
    pub fn indicator(&self) -> &[u8] {
        match self {
            Framing::IndicatorDelimited { indicator, .. } | Framing::FixedLength { indicator, .. } => {
                indicator
            }
            Framing::Delimited { .. } | Framing::LengthPrefixed { .. } => &[],
        }
    }

    /// Trailing marker, empty when the framing has none.
    pub fn delimiter(&self) -> &[u8] {
        match self {
            Framing::Delimited { delimiter } | Framing::IndicatorDelimited { delimiter, .. } => {
                delimiter
            }
            Framing::FixedLength { .. } | Framing::LengthPrefixed { .. } => &[],
        }
    }

    /// Scheme name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Framing::Delimited { .. } => "delimited",
            Framing::IndicatorDelimited { .. } => "indicator-delimited",
            Framing::FixedLength { .. } => "fixed-length",
            Framing::LengthPrefixed { .. } => "length-prefixed",
        }
    }
}

/// Framing, checksum and byte-stuffing rules for one connection.
///
/// Wire layout:
/// ```text
/// ┌───────────┬──────────────────────────────┬───────────┐
/// │ indicator │ escape(body ++ checksum)     │ delimiter │
/// │ (opt.)    │ checksum over indicator+body │ (opt.)    │
/// └───────────┴──────────────────────────────┴───────────┘
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    framing: Framing,
    checksum: Checksum,
    escaping: Option<Escaping>,
    max_frame: usize,
}

impl FrameCodec {
    /// Create a codec with no checksum and no escaping.
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            checksum: Checksum::None,
            escaping: None,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Shorthand for delimiter-terminated framing.
    pub fn delimited(delimiter: impl Into<Bytes>) -> Self {
        Self::new(Framing::Delimited {
            delimiter: delimiter.into(),
        })
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_escaping(mut self, escaping: Escaping) -> Self {
        self.escaping = Some(escaping);
        self
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn escaping(&self) -> Option<&Escaping> {
        self.escaping.as_ref()
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Reject descriptions that cannot frame reliably.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame == 0 {
            return Err(FrameError::InvalidConfig(
                "max frame size must be non-zero".to_string(),
            ));
        }
        match &self.framing {
            Framing::Delimited { delimiter } if delimiter.is_empty() => {
                return Err(FrameError::InvalidConfig("empty delimiter".to_string()));
            }
            Framing::IndicatorDelimited {
                indicator,
                delimiter,
            } if indicator.is_empty() || delimiter.is_empty() => {
                return Err(FrameError::InvalidConfig(
                    "indicator and delimiter must be non-empty".to_string(),
                ));
            }
            Framing::FixedLength { indicator, length } => {
                if indicator.is_empty() {
                    return Err(FrameError::InvalidConfig("empty indicator".to_string()));
                }
                if *length == 0 || *length < self.checksum.len() {
                    return Err(FrameError::InvalidConfig(format!(
                        "fixed length {length} cannot hold a {} checksum",
                        self.checksum
                    )));
                }
            }
            _ => {}
        }
        let delimited = matches!(
            self.framing,
            Framing::Delimited { .. } | Framing::IndicatorDelimited { .. }
        );
        if delimited && self.checksum != Checksum::None && self.escaping.is_none() {
            return Err(FrameError::InvalidConfig(format!(
                "a {} checksum can produce the delimiter byte; delimited framing with a checksum needs escaping",
                self.checksum
            )));
        }
        if let Some(escaping) = &self.escaping {
            escaping.validate()?;
            let markers = [self.framing.indicator(), self.framing.delimiter()];
            if let Some(marker) = markers
                .iter()
                .filter_map(|m| m.first())
                .find(|b| !escaping.is_reserved(**b))
            {
                return Err(FrameError::InvalidConfig(format!(
                    "marker byte 0x{marker:02X} must be reserved for escaping"
                )));
            }
        }
        Ok(())
    }

    /// Encode `body` into the wire format.
    pub fn encode(&self, body: &[u8], dst: &mut BytesMut) -> Result<()> {
        let indicator = self.framing.indicator();
        let delimiter = self.framing.delimiter();

        let mut covered = Vec::with_capacity(indicator.len() + body.len());
        covered.extend_from_slice(indicator);
        covered.extend_from_slice(body);
        let trailer = self.checksum.compute(&covered);
        let content_len = body.len() + trailer.len();

        match &self.framing {
            Framing::FixedLength { length, .. } if content_len != *length => {
                return Err(FrameError::LengthMismatch {
                    declared: Some(*length),
                    actual: content_len,
                });
            }
            Framing::LengthPrefixed { rule } => {
                let mut content = body.to_vec();
                content.extend_from_slice(&trailer);
                match rule.frame_length(&content) {
                    FrameLength::Total(total) if total == content_len => {}
                    FrameLength::Total(total) => {
                        return Err(FrameError::LengthMismatch {
                            declared: Some(total),
                            actual: content_len,
                        });
                    }
                    FrameLength::NeedMoreData => {
                        return Err(FrameError::LengthMismatch {
                            declared: None,
                            actual: content_len,
                        });
                    }
                }
            }
            _ => {}
        }

        let size = indicator.len() + content_len + delimiter.len();
        if size > self.max_frame {
            return Err(FrameError::Oversize {
                size,
                max: self.max_frame,
            });
        }

        let mut content = BytesMut::with_capacity(content_len);
        escape::escape_into(body, self.escaping.as_ref(), &mut content);
        escape::escape_into(&trailer, self.escaping.as_ref(), &mut content);
        if let Some(offset) = delimiter_collision(&content, delimiter) {
            return Err(FrameError::DelimiterInContent { offset });
        }

        dst.reserve(size);
        dst.put_slice(indicator);
        dst.put_slice(&content);
        dst.put_slice(delimiter);
        Ok(())
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` if `src` doesn't contain a complete frame yet. On
    /// success, consumes the frame bytes. On a recoverable error the corrupt
    /// bytes have been discarded and the caller may decode again.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match &self.framing {
            Framing::Delimited { delimiter } => self.decode_delimited(src, &[], delimiter),
            Framing::IndicatorDelimited {
                indicator,
                delimiter,
            } => {
                if !sync_to_indicator(src, indicator) {
                    return Ok(None);
                }
                self.decode_delimited(src, indicator, delimiter)
            }
            Framing::FixedLength { indicator, length } => {
                if !sync_to_indicator(src, indicator) {
                    return Ok(None);
                }
                let Some((content, raw_len)) = escape::unescape_prefix(
                    &src[indicator.len()..],
                    self.escaping.as_ref(),
                    *length,
                ) else {
                    return Ok(None);
                };
                self.take_counted(src, indicator, content, indicator.len() + raw_len)
                    .map(Some)
            }
            Framing::LengthPrefixed { rule } => {
                let available = escape::unescape_available(src, self.escaping.as_ref());
                match rule.frame_length(&available.bytes) {
                    FrameLength::NeedMoreData => {
                        self.check_overflow(src)?;
                        Ok(None)
                    }
                    FrameLength::Total(total) if total == 0 || total > self.max_frame => {
                        src.advance(1);
                        Err(FrameError::Oversize {
                            size: total,
                            max: self.max_frame,
                        })
                    }
                    FrameLength::Total(total) => {
                        if available.bytes.len() < total {
                            return Ok(None);
                        }
                        let raw_len = available.raw_len(total);
                        let content = available.bytes[..total].to_vec();
                        self.take_counted(src, &[], content, raw_len).map(Some)
                    }
                }
            }
        }
    }

    fn decode_delimited(
        &self,
        src: &mut BytesMut,
        indicator: &[u8],
        delimiter: &[u8],
    ) -> Result<Option<Frame>> {
        let start = indicator.len();
        let Some(pos) = find(&src[start..], delimiter) else {
            self.check_overflow(src)?;
            return Ok(None);
        };
        let end = start + pos;

        // The whole candidate frame goes, good or bad: the next byte after the
        // delimiter is the next resynchronisation point.
        let raw = src.split_to(end + delimiter.len()).freeze();
        let content = escape::unescape_all(&raw[start..end], self.escaping.as_ref())?;
        let (body, checksum) = self.verify(indicator, content)?;
        Ok(Some(Frame {
            raw,
            body,
            checksum,
        }))
    }

    /// Verify a counted frame before consuming it. On failure only the leading
    /// marker (or one byte) is dropped, so a real frame hiding inside the
    /// rejected span is still found.
    fn take_counted(
        &self,
        src: &mut BytesMut,
        indicator: &[u8],
        content: Vec<u8>,
        raw_len: usize,
    ) -> Result<Frame> {
        match self.verify(indicator, content) {
            Ok((body, checksum)) => {
                let raw = src.split_to(raw_len).freeze();
                Ok(Frame {
                    raw,
                    body,
                    checksum,
                })
            }
            Err(err) => {
                src.advance(indicator.len().max(1));
                Err(err)
            }
        }
    }

    fn verify(&self, indicator: &[u8], content: Vec<u8>) -> Result<(Bytes, Bytes)> {
        let trailer_len = self.checksum.len();
        if content.len() < trailer_len {
            return Err(FrameError::Checksum {
                scheme: self.checksum.name(),
                expected: Vec::new(),
                actual: content,
            });
        }
        let split = content.len() - trailer_len;

        let mut covered = Vec::with_capacity(indicator.len() + split);
        covered.extend_from_slice(indicator);
        covered.extend_from_slice(&content[..split]);
        self.checksum.verify(&covered, &content[split..])?;

        let mut body = Bytes::from(content);
        let checksum = body.split_off(split);
        Ok((body, checksum))
    }

    fn check_overflow(&self, src: &mut BytesMut) -> Result<()> {
        if src.len() > self.max_frame {
            let size = src.len();
            src.clear();
            return Err(FrameError::Oversize {
                size,
                max: self.max_frame,
            });
        }
        Ok(())
    }
}

/// Drop line noise in front of `indicator`. Returns `true` when `src` now
/// starts with it.
fn sync_to_indicator(src: &mut BytesMut, indicator: &[u8]) -> bool {
    match find(src, indicator) {
        Some(0) => true,
        Some(pos) => {
            debug!(discarded = pos, "skipping bytes before frame indicator");
            src.advance(pos);
            true
        }
        None => {
            // Keep a tail that could be the start of a split indicator.
            let keep = indicator.len().saturating_sub(1).min(src.len());
            let discard = src.len() - keep;
            if discard > 0 {
                debug!(discarded = discard, "no frame indicator in buffer");
                src.advance(discard);
            }
            false
        }
    }
}

/// First offset at which `delimiter` would be matched before the real one
/// appended after `content`.
fn delimiter_collision(content: &[u8], delimiter: &[u8]) -> Option<usize> {
    if delimiter.is_empty() {
        return None;
    }
    let mut wire = Vec::with_capacity(content.len() + delimiter.len());
    wire.extend_from_slice(content);
    wire.extend_from_slice(delimiter);
    find(&wire, delimiter).filter(|pos| *pos < content.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cr_codec(checksum: Checksum) -> FrameCodec {
        let codec = FrameCodec::delimited(Bytes::from_static(b"\r")).with_checksum(checksum);
        match checksum {
            Checksum::None => codec,
            _ => codec.with_escaping(cr_escaping()),
        }
    }

    fn cr_escaping() -> Escaping {
        Escaping::new(0x1B, 0x20, vec![0x0D])
    }

    fn lighting_codec() -> FrameCodec {
        FrameCodec::new(Framing::FixedLength {
            indicator: Bytes::from_static(&[0x05]),
            length: 5,
        })
        .with_checksum(Checksum::Xor)
    }

    #[test]
    fn roundtrip_every_checksum() {
        for checksum in [Checksum::None, Checksum::Xor, Checksum::Sum8, Checksum::Bcc] {
            let codec = cr_codec(checksum);
            let mut buf = BytesMut::new();
            codec.encode(b"INPUT HDMI", &mut buf).unwrap();

            let frame = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(frame.body.as_ref(), b"INPUT HDMI", "{checksum}");
            assert_eq!(frame.checksum.len(), checksum.len());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn checksum_trailer_equal_to_delimiter_roundtrips() {
        // 13 bytes make the BCC count byte 0x0D; "AL" XORs to 0x0D.
        let cases: [(Checksum, &[u8]); 2] = [
            (Checksum::Bcc, &b"INPUT HDMI 12"[..]),
            (Checksum::Xor, &b"AL"[..]),
        ];
        for (checksum, body) in cases {
            let codec = cr_codec(checksum);
            codec.validate().unwrap();

            let mut wire = BytesMut::new();
            codec.encode(body, &mut wire).unwrap();
            assert_eq!(wire.iter().filter(|b| **b == 0x0D).count(), 1, "{checksum}");

            let frame = codec.decode(&mut wire).unwrap().unwrap();
            assert_eq!(frame.body.as_ref(), body, "{checksum}");
            assert!(wire.is_empty());
        }
    }

    #[test]
    fn encode_refuses_unescaped_delimiter_in_content() {
        let bcc = FrameCodec::delimited(Bytes::from_static(b"\r")).with_checksum(Checksum::Bcc);
        let err = bcc.encode(b"INPUT HDMI 12", &mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, FrameError::DelimiterInContent { offset: 13 }));

        let plain = FrameCodec::delimited(Bytes::from_static(b"\r\n"));
        let mut wire = BytesMut::new();
        let err = plain.encode(b"AB\r\nC", &mut wire).unwrap_err();
        assert!(matches!(err, FrameError::DelimiterInContent { offset: 2 }));
        assert!(wire.is_empty());

        // A lone CR ahead of CR LF still decodes as part of the body.
        plain.encode(b"LINE\r", &mut wire).unwrap();
        let frame = plain.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), b"LINE\r");
    }

    #[test]
    fn validate_requires_escaping_for_delimited_checksums() {
        for checksum in [Checksum::Xor, Checksum::Sum8, Checksum::Bcc] {
            let bare = FrameCodec::delimited(Bytes::from_static(b"\r")).with_checksum(checksum);
            assert!(matches!(bare.validate(), Err(FrameError::InvalidConfig(_))));
            assert!(cr_codec(checksum).validate().is_ok());
        }
        assert!(cr_codec(Checksum::None).validate().is_ok());
        assert!(lighting_codec().validate().is_ok());
    }

    #[test]
    fn single_byte_mutation_is_a_checksum_error() {
        for checksum in [Checksum::Xor, Checksum::Sum8, Checksum::Bcc] {
            let codec = cr_codec(checksum);
            let mut wire = BytesMut::new();
            codec.encode(b"VOLUME", &mut wire).unwrap();

            for index in 0..b"VOLUME".len() {
                let mut corrupt = wire.clone();
                corrupt[index] ^= 0x20;
                let result = codec.decode(&mut corrupt);
                assert!(
                    matches!(result, Err(FrameError::Checksum { .. })),
                    "{checksum} byte {index}"
                );
                // The corrupt frame was consumed up to its delimiter.
                assert!(corrupt.is_empty());
            }
        }
    }

    #[test]
    fn lighting_on_frame_bytes() {
        let codec = lighting_codec();
        let mut wire = BytesMut::new();
        codec.encode(&[0x38, 0x00, 0x79, 0x05], &mut wire).unwrap();
        assert_eq!(wire.as_ref(), &[0x05, 0x38, 0x00, 0x79, 0x05, 0x41]);

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), &[0x38, 0x00, 0x79, 0x05]);
        assert_eq!(frame.checksum.as_ref(), &[0x41]);
        assert_eq!(frame.opcode(), Some(0x38));
    }

    #[test]
    fn fixed_length_resyncs_to_next_indicator() {
        let codec = lighting_codec();
        // Noise, a frame with a bad checksum, then a good frame.
        let mut buf = BytesMut::from(
            &[
                0xFF, 0x13, 0x05, 0x38, 0x00, 0x79, 0x05, 0x00, 0x05, 0x38, 0x00, 0x01, 0x05,
                0x39,
            ][..],
        );

        let mut errors = 0;
        let frame = loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => break frame,
                Ok(None) => panic!("good frame was lost during resync"),
                Err(err) => {
                    assert!(matches!(err, FrameError::Checksum { .. }));
                    errors += 1;
                }
            }
        };

        // The bad frame's own 0x05 body byte is tried as an indicator too.
        assert_eq!(errors, 2);
        assert_eq!(frame.body.as_ref(), &[0x38, 0x00, 0x01, 0x05]);
        assert!(buf.is_empty());
    }

    #[test]
    fn length_prefixed_one_byte_at_a_time() {
        let codec = FrameCodec::new(Framing::LengthPrefixed {
            rule: LengthRule::header_field(7, 6, FieldWidth::U8, 0),
        });
        let wire = [0xA5, 0x01, 0x02, 0x03, 0x04, 0x05, 0x03, 0x10, 0x20, 0x30];

        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            match codec.decode(&mut buf).unwrap() {
                Some(frame) => frames.push(frame),
                None => assert!(i < wire.len() - 1, "no frame after all 10 bytes"),
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body.as_ref(), &wire[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn length_prefixed_closure_rule() {
        // Binary protocol whose byte 1 is the total length.
        let codec = FrameCodec::new(Framing::LengthPrefixed {
            rule: LengthRule::new(|buf| match buf.get(1) {
                Some(len) => FrameLength::Total(*len as usize),
                None => FrameLength::NeedMoreData,
            }),
        })
        .with_checksum(Checksum::Sum8);

        let mut wire = BytesMut::new();
        codec.encode(&[0x81, 0x05, 0x11, 0x22], &mut wire).unwrap();
        assert_eq!(wire.len(), 5);

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), &[0x81, 0x05, 0x11, 0x22]);
    }

    #[test]
    fn length_prefixed_encode_rejects_wrong_length() {
        let codec = FrameCodec::new(Framing::LengthPrefixed {
            rule: LengthRule::header_field(2, 1, FieldWidth::U8, 0),
        });
        let mut wire = BytesMut::new();
        let err = codec.encode(&[0x01, 0x05, 0xAA], &mut wire).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                declared: Some(7),
                actual: 3
            }
        ));
    }

    #[test]
    fn indicator_delimited_skips_noise() {
        let codec = FrameCodec::new(Framing::IndicatorDelimited {
            indicator: Bytes::from_static(b"%1"),
            delimiter: Bytes::from_static(b"\r"),
        });
        let mut buf = BytesMut::from(&b"garbage%1POWR=1\r"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.text(), Some("POWR=1"));
        assert_eq!(frame.raw.as_ref(), b"%1POWR=1\r");
    }

    #[test]
    fn indicator_split_across_reads() {
        let codec = FrameCodec::new(Framing::IndicatorDelimited {
            indicator: Bytes::from_static(b"%1"),
            delimiter: Bytes::from_static(b"\r"),
        });
        let mut buf = BytesMut::from(&b"noise%"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), b"%");

        buf.extend_from_slice(b"1INPT=31\r");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.text(), Some("INPT=31"));
    }

    #[test]
    fn escaped_markers_inside_body() {
        let codec = FrameCodec::new(Framing::IndicatorDelimited {
            indicator: Bytes::from_static(&[0x02]),
            delimiter: Bytes::from_static(&[0x03]),
        })
        .with_checksum(Checksum::Xor)
        .with_escaping(Escaping::new(0x1B, 0x20, vec![0x02, 0x03]));
        codec.validate().unwrap();

        let body = [0x10, 0x02, 0x03, 0x1B, 0x11];
        let mut wire = BytesMut::new();
        codec.encode(&body, &mut wire).unwrap();
        assert_eq!(wire.iter().filter(|b| **b == 0x03).count(), 1);

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), &body);
    }

    #[test]
    fn fixed_length_with_split_escape() {
        let codec = FrameCodec::new(Framing::FixedLength {
            indicator: Bytes::from_static(&[0x02]),
            length: 3,
        })
        .with_escaping(Escaping::new(0x1B, 0x20, vec![0x02]));

        let mut wire = BytesMut::new();
        codec.encode(&[0x41, 0x02, 0x42], &mut wire).unwrap();
        assert_eq!(wire.as_ref(), &[0x02, 0x41, 0x1B, 0x22, 0x42]);

        let mut buf = BytesMut::from(&wire[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[3..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), &[0x41, 0x02, 0x42]);
    }

    #[test]
    fn partial_frame_waits() {
        let codec = cr_codec(Checksum::Xor);
        let mut buf = BytesMut::from(&b"POW"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), b"POW");
    }

    #[test]
    fn unterminated_noise_overflows() {
        let codec = cr_codec(Checksum::None).with_max_frame(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Oversize { size: 10, max: 8 }));
        assert!(err.is_recoverable());
        assert!(buf.is_empty());
    }

    #[test]
    fn fixed_length_encode_checks_length() {
        let err = lighting_codec()
            .encode(&[0x38, 0x00, 0x79], &mut BytesMut::new())
            .unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
    }

    #[test]
    fn validate_rejects_unreserved_marker() {
        let codec = FrameCodec::delimited(Bytes::from_static(b"\r"))
            .with_escaping(Escaping::new(0x1B, 0x20, vec![0x02]));
        assert!(matches!(codec.validate(), Err(FrameError::InvalidConfig(_))));
        assert!(FrameCodec::delimited(Bytes::new()).validate().is_err());
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let codec = cr_codec(Checksum::None);
        let mut buf = BytesMut::from(&b"POWR=1\rINPT=2\r"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.text(), Some("POWR=1"));
        assert_eq!(second.text(), Some("INPT=2"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
