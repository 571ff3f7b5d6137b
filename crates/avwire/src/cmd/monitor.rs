use avwire_frame::FrameDecoder;
use avwire_transport::{TcpConfig, TcpTransport, TransportEvent};
use tracing::{info, warn};

use crate::cmd::MonitorArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

/// Print frames until Ctrl+C or `--count`. Reconnects when the link drops.
pub async fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let codec = args.codec.build()?;
    let (transport, mut events) = TcpTransport::spawn(args.addr.clone(), TcpConfig::default());
    let mut decoder = FrameDecoder::new(codec);
    let mut printed = 0usize;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(TransportEvent::Data(bytes)) => {
                    decoder.push(&bytes);
                    while let Some(frame) = decoder.next_frame() {
                        print_frame(&frame, &args.addr, format);
                        printed = printed.saturating_add(1);
                        if args.count.is_some_and(|count| printed >= count) {
                            transport.shutdown();
                            return Ok(SUCCESS);
                        }
                    }
                }
                Some(TransportEvent::Connected) => info!(addr = %args.addr, "monitoring"),
                Some(TransportEvent::Disconnected) => {
                    if decoder.buffered() > 0 {
                        warn!(discarded = decoder.buffered(), "partial frame lost on disconnect");
                    }
                    decoder.clear();
                }
                Some(TransportEvent::Connecting) => {}
                None => break,
            },
        }
    }

    transport.shutdown();
    Ok(SUCCESS)
}
