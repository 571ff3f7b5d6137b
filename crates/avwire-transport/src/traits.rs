use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Outbound half of a device connection, supplied by the host.
///
/// `send` must not block: implementations hand the bytes to whatever owns the
/// socket (a writer task, a serial gateway) and return. Delivery failures show
/// up later as a [`TransportEvent::Disconnected`].
pub trait Transport: Send + Sync {
    /// Queue raw bytes for transmission to the device.
    fn send(&self, bytes: Bytes) -> Result<()>;

    /// Ask the host to tear the connection down.
    ///
    /// Used by the engine when an explicit policy (for example repeated login
    /// failure) decides the session must be re-established. The default does
    /// nothing.
    fn disconnect(&self) {}

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str {
        "custom"
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, bytes: Bytes) -> Result<()> {
        (**self).send(bytes)
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, bytes: Bytes) -> Result<()> {
        (**self).send(bytes)
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

/// Inbound half of a device connection, delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The host started opening the connection.
    Connecting,
    /// The connection is open and bytes may flow.
    Connected,
    /// Raw bytes arrived from the device. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// The connection closed or failed.
    Disconnected,
}

impl TransportEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            TransportEvent::Connecting => "connecting",
            TransportEvent::Connected => "connected",
            TransportEvent::Data(_) => "data",
            TransportEvent::Disconnected => "disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Bytes>>,
    }

    impl Transport for Recorder {
        fn send(&self, bytes: Bytes) -> Result<()> {
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    #[test]
    fn arc_forwards_to_inner_transport() {
        let inner = Arc::new(Recorder::default());
        let shared: Arc<dyn Transport> = inner.clone();

        shared.send(Bytes::from_static(b"PWR?\r")).unwrap();
        shared.disconnect();

        assert_eq!(shared.transport_name(), "custom");
        assert_eq!(inner.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn event_labels() {
        assert_eq!(TransportEvent::Connected.label(), "connected");
        assert_eq!(TransportEvent::Data(Bytes::new()).label(), "data");
        assert_eq!(TransportEvent::Disconnected.label(), "disconnected");
    }
}
