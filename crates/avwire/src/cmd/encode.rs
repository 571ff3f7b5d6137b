use bytes::BytesMut;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_encoded, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let codec = args.codec.build()?;
    let body = args.body.bytes()?;

    let mut wire = BytesMut::new();
    codec
        .encode(&body, &mut wire)
        .map_err(|err| frame_error("encode failed", err))?;

    print_encoded(&body, &wire, format);
    Ok(SUCCESS)
}
