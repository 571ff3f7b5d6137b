use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use avwire_frame::{Checksum, CodecProfile, Escaping, FrameCodec, FramingProfile};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, INTERNAL, USAGE};
use crate::output::{parse_hex, OutputFormat};

pub mod decode;
pub mod encode;
pub mod monitor;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Frame a body and print the wire bytes.
    Encode(EncodeArgs),
    /// Decode a byte stream and print its frames.
    Decode(DecodeArgs),
    /// Connect over TCP and send one framed command.
    Send(SendArgs),
    /// Connect over TCP and print every received frame.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Monitor(args) => block_on(monitor::run(args, format)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F: std::future::Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    runtime.block_on(future)
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum ChecksumArg {
    #[default]
    None,
    Xor,
    Sum8,
    Bcc,
}

impl From<ChecksumArg> for Checksum {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::None => Checksum::None,
            ChecksumArg::Xor => Checksum::Xor,
            ChecksumArg::Sum8 => Checksum::Sum8,
            ChecksumArg::Bcc => Checksum::Bcc,
        }
    }
}

const ESCAPE_DELTA: u8 = 0x20;

/// How frames are delimited and checked.
#[derive(Args, Debug, Clone)]
pub struct CodecArgs {
    /// Use a bundled driver's framing (lighting, display).
    #[arg(long, conflicts_with_all = ["profile", "delimiter", "checksum", "escape"])]
    pub driver: Option<String>,
    /// JSON codec profile file.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["delimiter", "checksum", "escape"])]
    pub profile: Option<PathBuf>,
    /// Frame delimiter as hex, for plain delimited framing.
    #[arg(long, default_value = "0d")]
    pub delimiter: String,
    /// Checksum scheme, for plain delimited framing.
    #[arg(long, value_enum, default_value = "none")]
    pub checksum: ChecksumArg,
    /// Escape byte as hex; the delimiter is escaped as ESC, byte + 0x20.
    /// Required with --checksum.
    #[arg(long, value_name = "HEX")]
    pub escape: Option<String>,
}

impl CodecArgs {
    pub fn profile(&self) -> CliResult<CodecProfile> {
        if let Some(driver) = &self.driver {
            return avwire_drivers::profile(driver).ok_or_else(|| {
                CliError::new(
                    USAGE,
                    format!(
                        "unknown driver '{driver}' (expected one of: {})",
                        avwire_drivers::DRIVERS.join(", ")
                    ),
                )
            });
        }
        if let Some(path) = &self.profile {
            let text = fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            return serde_json::from_str(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("{} is not a codec profile: {err}", path.display()),
                )
            });
        }
        let delimiter = parse_hex(&self.delimiter)?;
        let escaping = match &self.escape {
            Some(escape) => match parse_hex(escape)?.as_slice() {
                [byte] => Some(Escaping::new(*byte, ESCAPE_DELTA, delimiter.clone())),
                _ => return Err(CliError::new(USAGE, "--escape takes exactly one byte")),
            },
            None => None,
        };
        Ok(CodecProfile {
            checksum: self.checksum.into(),
            escaping,
            ..CodecProfile::new(FramingProfile::Delimited { delimiter })
        })
    }

    pub fn build(&self) -> CliResult<FrameCodec> {
        self.profile()?
            .build()
            .map_err(|err| frame_error("invalid codec", err))
    }
}

/// Frame body given on the command line.
#[derive(Args, Debug, Clone)]
pub struct BodyArgs {
    /// Frame body; text unless --hex is given.
    pub body: String,
    /// Treat BODY as hex bytes.
    #[arg(long)]
    pub hex: bool,
}

impl BodyArgs {
    pub fn bytes(&self) -> CliResult<Vec<u8>> {
        if self.hex {
            parse_hex(&self.body)
        } else {
            Ok(self.body.as_bytes().to_vec())
        }
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub body: BodyArgs,
    #[command(flatten)]
    pub codec: CodecArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Byte stream as hex.
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub input: Option<String>,
    /// Read the raw byte stream from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    #[command(flatten)]
    pub codec: CodecArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Device address (host:port).
    pub addr: String,
    #[command(flatten)]
    pub body: BodyArgs,
    #[command(flatten)]
    pub codec: CodecArgs,
    /// Wait for one response frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Maximum time to wait for the connection.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Resends after a timeout when --wait is set.
    #[arg(long, default_value = "0")]
    pub retries: u32,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Device address (host:port).
    pub addr: String,
    #[command(flatten)]
    pub codec: CodecArgs,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
