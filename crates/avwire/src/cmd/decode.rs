use std::fs;

use avwire_frame::FrameDecoder;

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, CliResult, FAILURE, SUCCESS};
use crate::output::{parse_hex, print_decode_summary, print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let codec = args.codec.build()?;
    let stream = match (&args.file, &args.input) {
        (Some(path), _) => fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        (None, Some(hex)) => parse_hex(hex)?,
        (None, None) => Vec::new(),
    };

    let mut decoder = FrameDecoder::new(codec);
    decoder.push(&stream);
    let frames = decoder.drain();
    for frame in &frames {
        print_frame(frame, "input", format);
    }
    print_decode_summary(
        frames.len(),
        decoder.checksum_errors(),
        decoder.buffered(),
        format,
    );

    // Corrupt input is reported through the exit code as well.
    if decoder.checksum_errors() > 0 {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}
