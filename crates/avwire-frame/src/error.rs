/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A complete frame arrived but its checksum did not verify.
    ///
    /// The offending bytes have already been discarded from the buffer.
    #[error("{scheme} checksum mismatch (expected {expected:02X?}, got {actual:02X?})")]
    Checksum {
        scheme: &'static str,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// An escape marker was the last byte of an otherwise complete frame.
    #[error("escape marker at end of frame")]
    DanglingEscape,

    /// The frame (or unframed noise) exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    Oversize { size: usize, max: usize },

    /// The body does not fit the length the framing declares.
    #[error("frame length mismatch (framing declares {declared:?} bytes, got {actual})")]
    LengthMismatch {
        declared: Option<usize>,
        actual: usize,
    },

    /// The encoded content would contain the frame delimiter, so the frame
    /// would be cut short on decode. Configure escaping for the delimiter.
    #[error("encoded frame contains the delimiter at offset {offset}")]
    DelimiterInContent { offset: usize },

    /// The codec description is unusable.
    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether decoding can simply continue after this error.
    ///
    /// Corrupt and oversized input has been discarded by the time the error
    /// is returned, so the stream is already resynchronised.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::Checksum { .. } | FrameError::DanglingEscape | FrameError::Oversize { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
