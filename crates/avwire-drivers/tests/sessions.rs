//! Drivers running inside a real session over a loopback transport.

use std::time::Duration;

use avwire_drivers::{display, lighting};
use avwire_engine::{
    transport_channel, ConfigSnapshot, ConnectionState, SessionConfig, SessionHandle,
    StatusChange, StatusValue, TransportEvents,
};
use avwire_transport::{ChannelTransport, TransportEvent};
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

struct Device {
    handle: SessionHandle,
    wire: UnboundedReceiver<Bytes>,
    events: TransportEvents,
}

impl Device {
    fn start(builder: avwire_engine::SessionBuilder) -> Self {
        let (transport, wire) = ChannelTransport::new();
        let (events, events_rx) = transport_channel();
        let handle = builder.spawn(transport, events_rx).unwrap();
        events.send(TransportEvent::Connecting).unwrap();
        events.send(TransportEvent::Connected).unwrap();
        Self {
            handle,
            wire,
            events,
        }
    }

    async fn sent(&mut self) -> Bytes {
        self.wire.recv().await.unwrap()
    }

    fn receive(&self, bytes: &[u8]) {
        self.events
            .send(TransportEvent::Data(Bytes::copy_from_slice(bytes)))
            .unwrap();
    }

    async fn idle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lighting_group_reaches_target_from_echo() {
    let snapshot = ConfigSnapshot::new().with("groups", vec![5]);
    let builder = lighting::session(&snapshot).unwrap().with_config(SessionConfig {
        poll_interval: None,
        ..SessionConfig::default()
    });
    let mut device = Device::start(builder);
    let mut changes = device.handle.subscribe();

    device
        .handle
        .set_target(lighting::group_key(5), true)
        .await
        .unwrap();
    let on = [0x05, 0x38, 0x00, 0x79, 0x05, 0x41];
    assert_eq!(device.sent().await.as_ref(), &on);

    device.receive(&on);
    device.idle().await;

    let entry = device
        .handle
        .status(lighting::group_key(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.observed, Some(StatusValue::Bool(true)));
    assert!(entry.stable);
    assert!(std::iter::from_fn(|| changes.try_recv().ok()).any(|change| matches!(
        change,
        StatusChange::Stable { stable: true, .. }
    )));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lighting_panel_frame_split_across_reads() {
    let builder = lighting::session(&ConfigSnapshot::new())
        .unwrap()
        .with_config(SessionConfig {
            poll_interval: None,
            ..SessionConfig::default()
        });
    let device = Device::start(builder);

    // Group 9 switched off at a wall panel, delivered in two reads.
    device.receive(&[0x05, 0x38, 0x00]);
    device.receive(&[0x01, 0x09, 0x05 ^ 0x38 ^ 0x01 ^ 0x09]);
    device.idle().await;

    let entry = device
        .handle
        .status(lighting::group_key(9))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.observed, Some(StatusValue::Bool(false)));
    assert!(entry.target.is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn display_login_polls_and_busy_retry() {
    let snapshot = ConfigSnapshot::new().with("password", "1234");
    let mut device = Device::start(display::session(&snapshot));

    assert_eq!(device.sent().await.as_ref(), b"PASS 1234\r");
    assert_eq!(
        device.handle.state().await.unwrap(),
        ConnectionState::Connecting
    );
    device.receive(b"LOGIN OK\r");

    // Polls go out as soon as the login completes.
    assert_eq!(device.sent().await.as_ref(), b"POWR?\r");
    assert_eq!(device.sent().await.as_ref(), b"INPT?\r");
    device.receive(b"POWR=0\rINPT=1\r");
    device.idle().await;

    device
        .handle
        .set_target(display::POWER, true)
        .await
        .unwrap();
    assert_eq!(device.sent().await.as_ref(), b"POWR 1\r");
    device.receive(b"ERR 4\r");
    assert_eq!(device.sent().await.as_ref(), b"POWR 1\r");
    device.receive(b"OK\r");
    device.idle().await;

    let power = device.handle.status(display::POWER).await.unwrap().unwrap();
    assert_eq!(power.observed, Some(StatusValue::Bool(true)));
    let input = device.handle.status(display::INPUT).await.unwrap().unwrap();
    assert_eq!(input.observed, Some(StatusValue::from("hdmi1")));
    assert_eq!(
        device.handle.state().await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn display_input_target_by_name() {
    let mut device = Device::start(display::session(&ConfigSnapshot::new()).with_config(
        SessionConfig {
            poll_interval: None,
            ..SessionConfig::default()
        },
    ));

    device
        .handle
        .set_target(display::INPUT, "displayport")
        .await
        .unwrap();
    assert_eq!(device.sent().await.as_ref(), b"INPT 3\r");
    device.receive(b"OK\r");
    device.idle().await;

    let input = device.handle.status(display::INPUT).await.unwrap().unwrap();
    assert_eq!(input.observed, Some(StatusValue::from("displayport")));
    assert!(input.stable);
}
