use std::sync::Arc;
use std::time::Duration;

use avwire_engine::{
    Classification, Command, ConnectionState, FnClassifier, SessionBuilder, SessionConfig,
    StatusChange,
};
use avwire_frame::Frame;
use avwire_transport::{TcpConfig, TcpTransport, Transport};
use tokio::sync::broadcast;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{engine_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR};
use crate::output::{print_frame, OutputFormat};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let codec = args.codec.build()?;
    let body = args.body.bytes()?;

    let (transport, events) = TcpTransport::spawn(
        args.addr.clone(),
        TcpConfig {
            connect_timeout,
            reconnect_delay: None,
            ..TcpConfig::default()
        },
    );
    let transport = Arc::new(transport);
    let session = SessionBuilder::new(codec, Arc::new(FnClassifier(first_frame_answers)))
        .with_config(SessionConfig {
            poll_interval: None,
            ..SessionConfig::default()
        })
        .spawn(Arc::clone(&transport), events)
        .map_err(|err| engine_error("session setup failed", err))?;
    let mut changes = session.subscribe();

    let retries = if args.wait { args.retries } else { 0 };
    let command = Command::new("send", body)
        .with_wait(args.wait)
        .with_timeout(wait_timeout)
        .with_retries(retries);
    let budget = connect_timeout + wait_timeout * (retries + 1);

    let outcome = tokio::time::timeout(budget, async {
        tokio::select! {
            biased;
            result = session.execute(command) => Some(result),
            _ = disconnected(&mut changes) => None,
        }
    })
    .await;

    // Let queued bytes reach the socket before the runtime goes away.
    transport.disconnect();
    let _ = tokio::time::timeout(CLOSE_GRACE, disconnected(&mut changes)).await;
    session.shutdown();
    transport.shutdown();

    let reply = match outcome {
        Ok(Some(result)) => result.map_err(|err| engine_error("send failed", err))?,
        Ok(None) => {
            return Err(CliError::new(
                TRANSPORT_ERROR,
                format!("connection to {} failed or closed", args.addr),
            ))
        }
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("no answer from {} within {budget:?}", args.addr),
            ))
        }
    };
    if let Some(frame) = &reply.frame {
        print_frame(frame, &args.addr, format);
    }
    Ok(SUCCESS)
}

/// Any frame answers the one command this tool sends.
fn first_frame_answers(_frame: &Frame, in_flight: Option<&Command>) -> Classification {
    match in_flight {
        Some(_) => Classification::success(),
        None => Classification::ignore(),
    }
}

async fn disconnected(changes: &mut broadcast::Receiver<StatusChange>) {
    loop {
        match changes.recv().await {
            Ok(StatusChange::Connection {
                state: ConnectionState::Disconnected,
            }) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn only_in_flight_commands_are_answered() {
        let frame = Frame::new(Bytes::from_static(b"OK"));
        let command = Command::new("send", Bytes::from_static(b"POWR?"));
        assert_eq!(
            first_frame_answers(&frame, Some(&command)).verdict,
            avwire_engine::Verdict::Success
        );
        assert_eq!(
            first_frame_answers(&frame, None).verdict,
            avwire_engine::Verdict::Ignore
        );
    }
}
