mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "avwire", version, about = "Device protocol framing and session CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "avwire",
            "send",
            "10.0.0.5:4352",
            "POWR 1",
            "--wait",
            "--wait-timeout",
            "2s",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_driver_with_explicit_delimiter() {
        let err = Cli::try_parse_from([
            "avwire",
            "encode",
            "38007905",
            "--hex",
            "--driver",
            "lighting",
            "--delimiter",
            "0d",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn decode_needs_input() {
        let err = Cli::try_parse_from(["avwire", "decode"]).expect_err("missing input");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_monitor_subcommand() {
        let cli = Cli::try_parse_from([
            "avwire", "monitor", "10.0.0.9:10001", "--driver", "lighting", "--count", "3",
        ])
        .expect("monitor args should parse");
        assert!(matches!(cli.command, Command::Monitor(_)));
    }
}
