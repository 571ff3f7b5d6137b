use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportEvent};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Configuration for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum time allowed for one connection attempt.
    pub connect_timeout: Duration,
    /// Delay before re-connecting after a drop. `None` disables reconnects.
    pub reconnect_delay: Option<Duration>,
    /// Disable Nagle's algorithm. Most control protocols send tiny frames.
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Some(Duration::from_secs(5)),
            nodelay: true,
        }
    }
}

enum Outbound {
    Bytes(Bytes),
    Disconnect,
}

/// TCP transport for networked devices and serial-over-IP gateways.
///
/// A background task owns the socket. Outbound bytes are handed to it through
/// a channel; inbound bytes and connection transitions are reported as
/// [`TransportEvent`]s on the receiver returned by [`TcpTransport::spawn`].
pub struct TcpTransport {
    addr: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TcpTransport {
    /// Start connecting to `addr` (`host:port`) in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        addr: impl Into<String>,
        config: TcpConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let addr = addr.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(connection_loop(
            addr.clone(),
            config,
            outbound_rx,
            event_tx,
            Arc::clone(&connected),
            cancel.clone(),
        ));

        (
            Self {
                addr,
                outbound: outbound_tx,
                connected,
                cancel,
            },
            event_rx,
        )
    }

    /// The address this transport connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the background task. No reconnect is attempted afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Transport for TcpTransport {
    fn send(&self, bytes: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(Outbound::Bytes(bytes))
            .map_err(|_| TransportError::Shutdown)
    }

    fn disconnect(&self) {
        let _ = self.outbound.send(Outbound::Disconnect);
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn connection_loop(
    addr: String,
    config: TcpConfig,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let _ = events.send(TransportEvent::Connecting);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect(&addr, &config) => result,
        };

        match attempt {
            Ok(stream) => {
                info!(%addr, "tcp transport connected");
                // Anything queued while the link was down belongs to a dead session.
                while outbound.try_recv().is_ok() {}
                connected.store(true, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Connected);

                let keep_going = pump(stream, &mut outbound, &events, &cancel).await;

                connected.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Disconnected);
                info!(%addr, "tcp transport disconnected");
                if !keep_going {
                    return;
                }
            }
            Err(err) => {
                warn!(%addr, error = %err, "tcp connect failed");
                let _ = events.send(TransportEvent::Disconnected);
            }
        }

        let Some(delay) = config.reconnect_delay else {
            return;
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn connect(addr: &str, config: &TcpConfig) -> Result<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.to_string(),
            timeout: config.connect_timeout,
        })?
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(config.nodelay)?;
    Ok(stream)
}

/// Shuttle bytes until the socket closes. Returns `false` when the transport
/// was shut down and must not reconnect.
async fn pump(
    stream: TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> bool {
    let (mut reader, mut writer) = stream.into_split();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return false,

            msg = outbound.recv() => match msg {
                Some(Outbound::Bytes(bytes)) => {
                    if let Err(err) = writer.write_all(&bytes).await {
                        warn!(error = %err, "tcp write failed");
                        return true;
                    }
                }
                Some(Outbound::Disconnect) => {
                    debug!("tcp disconnect requested");
                    let _ = writer.shutdown().await;
                    return true;
                }
                None => return false,
            },

            read = reader.read(&mut chunk) => match read {
                Ok(0) => return true,
                Ok(n) => {
                    let _ = events.send(TransportEvent::Data(Bytes::copy_from_slice(&chunk[..n])));
                }
                Err(err) => {
                    warn!(error = %err, "tcp read failed");
                    return true;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn next_non_connecting(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event != TransportEvent::Connecting {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn connects_sends_and_receives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"PWR?\r");
            socket.write_all(b"PWR=1\r").await.unwrap();
            socket
        });

        let (transport, mut events) = TcpTransport::spawn(addr, TcpConfig::default());
        assert_eq!(next_non_connecting(&mut events).await, TransportEvent::Connected);

        transport.send(Bytes::from_static(b"PWR?\r")).unwrap();

        let mut received = Vec::new();
        while received.len() < 6 {
            match next_non_connecting(&mut events).await {
                TransportEvent::Data(bytes) => received.extend_from_slice(&bytes),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(received, b"PWR=1\r");

        let _socket = server.await.unwrap();
        transport.shutdown();
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let config = TcpConfig {
            connect_timeout: Duration::from_millis(200),
            reconnect_delay: None,
            ..TcpConfig::default()
        };
        // Port 9 on localhost is almost never open; either way no Connected event
        // has been observed yet, so the send must be refused.
        let (transport, _events) = TcpTransport::spawn("127.0.0.1:9", config);
        let err = transport.send(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn peer_close_reports_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let config = TcpConfig {
            reconnect_delay: None,
            ..TcpConfig::default()
        };
        let (transport, mut events) = TcpTransport::spawn(addr, config);
        assert_eq!(next_non_connecting(&mut events).await, TransportEvent::Connected);
        server.await.unwrap();
        assert_eq!(next_non_connecting(&mut events).await, TransportEvent::Disconnected);
        assert!(!transport.is_connected());
    }
}
