use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use avwire_frame::Frame;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::exit::{CliError, CliResult, USAGE};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    source: &'a str,
    body_hex: String,
    body_text: Option<&'a str>,
    checksum_hex: String,
    wire_size: usize,
    timestamp: String,
}

#[derive(Serialize)]
struct EncodedOutput {
    body_hex: String,
    wire_hex: String,
    wire_size: usize,
}

#[derive(Serialize)]
struct DecodeSummary {
    frames: usize,
    checksum_errors: u64,
    trailing_bytes: usize,
}

pub fn print_frame(frame: &Frame, source: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                source,
                body_hex: to_hex(&frame.body),
                body_text: printable(&frame.body),
                checksum_hex: to_hex(&frame.checksum),
                wire_size: frame.wire_size(),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOURCE", "SIZE", "BODY", "CHECKSUM"])
                .add_row(vec![
                    source.to_string(),
                    frame.wire_size().to_string(),
                    body_preview(&frame.body),
                    to_hex(&frame.checksum),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "source={} size={} body={} checksum={}",
                source,
                frame.wire_size(),
                body_preview(&frame.body),
                to_hex(&frame.checksum)
            );
        }
        OutputFormat::Raw => print_raw(&frame.raw),
    }
}

pub fn print_encoded(body: &[u8], wire: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EncodedOutput {
            body_hex: to_hex(body),
            wire_hex: to_hex(wire),
            wire_size: wire.len(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["BODY", "WIRE", "SIZE"])
                .add_row(vec![
                    body_preview(body),
                    to_hex(wire),
                    wire.len().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", to_hex(wire)),
        OutputFormat::Raw => print_raw(wire),
    }
}

pub fn print_decode_summary(
    frames: usize,
    checksum_errors: u64,
    trailing_bytes: usize,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&DecodeSummary {
            frames,
            checksum_errors,
            trailing_bytes,
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "frames={frames} checksum_errors={checksum_errors} trailing_bytes={trailing_bytes}"
        ),
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Space-separated uppercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex with optional whitespace, `:` or `0x` prefixes between bytes.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if !digits.is_ascii() {
        return Err(CliError::new(USAGE, "hex input must be ASCII"));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex input has an odd number of digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex byte '{}'", &digits[i..i + 2])))
        })
        .collect()
}

fn printable(body: &[u8]) -> Option<&str> {
    std::str::from_utf8(body)
        .ok()
        .filter(|text| text.chars().all(|c| !c.is_control() || c == '\t'))
}

fn body_preview(body: &[u8]) -> String {
    match printable(body) {
        Some(text) => text.to_string(),
        None => to_hex(body),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_with_separators() {
        assert_eq!(parse_hex("05 38 00 79").unwrap(), vec![0x05, 0x38, 0x00, 0x79]);
        assert_eq!(parse_hex("0x05:0x38").unwrap(), vec![0x05, 0x38]);
        assert_eq!(parse_hex("0d0A").unwrap(), vec![0x0D, 0x0A]);
        assert_eq!(to_hex(&[0x05, 0x41]), "05 41");
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(parse_hex("053").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn binary_bodies_preview_as_hex() {
        assert_eq!(body_preview(b"POWR=1"), "POWR=1");
        assert_eq!(body_preview(&[0x38, 0x00]), "38 00");
    }
}
