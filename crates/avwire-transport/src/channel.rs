use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// In-process transport that forwards every sent chunk to a channel.
///
/// Hosts use it to bridge the engine to a transport they drive themselves;
/// tests use it to observe exactly what the engine put on the wire.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    disconnect_requested: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Create a transport and the receiver observing its outbound bytes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                disconnect_requested: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Whether the engine asked for the connection to be torn down.
    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::SeqCst)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, bytes: Bytes) -> Result<()> {
        self.tx.send(bytes).map_err(|_| TransportError::Shutdown)
    }

    fn disconnect(&self) {
        debug!("channel transport disconnect requested");
        self.disconnect_requested.store(true, Ordering::SeqCst);
    }

    fn transport_name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_sent_bytes() {
        let (transport, mut rx) = ChannelTransport::new();
        transport.send(Bytes::from_static(b"one")).unwrap();
        transport.send(Bytes::from_static(b"two")).unwrap();

        assert_eq!(rx.recv().await.unwrap().as_ref(), b"one");
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_shutdown() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);

        let err = transport.send(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::Shutdown));
    }

    #[test]
    fn records_disconnect_request() {
        let (transport, _rx) = ChannelTransport::new();
        assert!(!transport.disconnect_requested());
        transport.disconnect();
        assert!(transport.disconnect_requested());
    }
}
