//! Serializable codec descriptions.
//!
//! Driver definitions and the CLI describe a connection's framing as data;
//! [`CodecProfile::build`] validates it and produces a [`FrameCodec`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::codec::{FieldWidth, FrameCodec, Framing, LengthRule, DEFAULT_MAX_FRAME};
use crate::error::Result;
use crate::escape::Escaping;

/// Framing expressed as plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FramingProfile {
    Delimited {
        delimiter: Vec<u8>,
    },
    IndicatorDelimited {
        indicator: Vec<u8>,
        delimiter: Vec<u8>,
    },
    FixedLength {
        indicator: Vec<u8>,
        length: usize,
    },
    /// Length-prefixed framing with the body length carried in a header field.
    LengthField {
        header_len: usize,
        offset: usize,
        width: FieldWidth,
        #[serde(default)]
        trailer_len: usize,
    },
}

impl FramingProfile {
    fn into_framing(self) -> Framing {
        match self {
            FramingProfile::Delimited { delimiter } => Framing::Delimited {
                delimiter: Bytes::from(delimiter),
            },
            FramingProfile::IndicatorDelimited {
                indicator,
                delimiter,
            } => Framing::IndicatorDelimited {
                indicator: Bytes::from(indicator),
                delimiter: Bytes::from(delimiter),
            },
            FramingProfile::FixedLength { indicator, length } => Framing::FixedLength {
                indicator: Bytes::from(indicator),
                length,
            },
            FramingProfile::LengthField {
                header_len,
                offset,
                width,
                trailer_len,
            } => Framing::LengthPrefixed {
                rule: LengthRule::header_field(header_len, offset, width, trailer_len),
            },
        }
    }
}

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}

/// Complete per-connection codec description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecProfile {
    pub framing: FramingProfile,
    #[serde(default)]
    pub checksum: Checksum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escaping: Option<Escaping>,
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,
}

impl CodecProfile {
    pub fn new(framing: FramingProfile) -> Self {
        Self {
            framing,
            checksum: Checksum::None,
            escaping: None,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Validate the description and build the codec.
    pub fn build(&self) -> Result<FrameCodec> {
        let mut codec = FrameCodec::new(self.framing.clone().into_framing())
            .with_checksum(self.checksum)
            .with_max_frame(self.max_frame);
        if let Some(escaping) = &self.escaping {
            codec = codec.with_escaping(escaping.clone());
        }
        codec.validate()?;
        Ok(codec)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::error::FrameError;

    #[test]
    fn builds_from_json() {
        let profile: CodecProfile = serde_json::from_str(
            r#"{
                "framing": { "kind": "fixed_length", "indicator": [5], "length": 5 },
                "checksum": "xor"
            }"#,
        )
        .unwrap();
        assert_eq!(profile.max_frame, DEFAULT_MAX_FRAME);

        let codec = profile.build().unwrap();
        let mut wire = BytesMut::new();
        codec.encode(&[0x38, 0x00, 0x79, 0x05], &mut wire).unwrap();
        assert_eq!(wire.last(), Some(&0x41));
    }

    #[test]
    fn length_field_profile() {
        let profile = CodecProfile::new(FramingProfile::LengthField {
            header_len: 2,
            offset: 1,
            width: FieldWidth::U8,
            trailer_len: 1,
        });
        let profile = CodecProfile {
            checksum: Checksum::Sum8,
            ..profile
        };
        let codec = profile.build().unwrap();

        let mut wire = BytesMut::new();
        codec.encode(&[0xA0, 0x02, 0x11, 0x22], &mut wire).unwrap();
        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), &[0xA0, 0x02, 0x11, 0x22]);
    }

    #[test]
    fn build_validates() {
        let profile = CodecProfile {
            escaping: Some(Escaping::new(0x1B, 0x20, vec![0x02])),
            ..CodecProfile::new(FramingProfile::Delimited {
                delimiter: b"\r".to_vec(),
            })
        };
        assert!(matches!(profile.build(), Err(FrameError::InvalidConfig(_))));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let profile = CodecProfile::new(FramingProfile::Delimited {
            delimiter: vec![0x0D],
        });
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["framing"]["kind"], "delimited");
        assert_eq!(json["checksum"], "none");
        assert!(json.get("escaping").is_none());
    }
}
