//! End-to-end tests that drive two full `Communicator`s against the
//! in-memory fake BLE hosts in `ble_link_core::testing`.
//!
//! Unlike the unit tests inside `channel.rs`/`testing.rs`, these exercise
//! the whole stack through `Communicator::new` and its public API, the way
//! `ble-link-cli` does: two simulated devices, each pumping `HostEvent`s
//! from its own fake central/peripheral adapter into `on_central_event`/
//! `on_peripheral_event`, observing what happens purely through
//! `Callbacks`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OnceCell};
use tokio::time::timeout;

use ble_link_core::host::{CentralHost, Characteristic, DeviceHandle};
use ble_link_core::testing::{link, FakeCentralHost, FakePeripheralHost};
use ble_link_core::{Callbacks, Communicator, Config, DataMessage, Message, Peer, Role};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Observable callback firings for one simulated device, collected onto
/// unbounded channels so a test can `.await` the ones it cares about in
/// whatever order they actually arrive.
struct Events {
    peer_found: mpsc::UnboundedReceiver<Peer>,
    connection_success: mpsc::UnboundedReceiver<(Peer, Role)>,
    connection_failed: mpsc::UnboundedReceiver<(Peer, String)>,
    connection_lost: mpsc::UnboundedReceiver<Peer>,
    connection_resumed: mpsc::UnboundedReceiver<Peer>,
    disconnected: mpsc::UnboundedReceiver<(Peer, usize)>,
    message_received: mpsc::UnboundedReceiver<(Message, Role)>,
    data_received: mpsc::UnboundedReceiver<(DataMessage, Role)>,
}

/// One simulated device: a full `Communicator` wired to its own pair of
/// fake hosts, plus the event-pump tasks feeding it and an `Events` handle
/// for the test to observe it with.
struct Device {
    name: String,
    communicator: Arc<Communicator>,
    central: Arc<FakeCentralHost>,
    peripheral: Arc<FakePeripheralHost>,
    peripheral_addr: String,
    events: Events,
}

/// Build one simulated device. Inbound connection requests are
/// auto-accepted or auto-rejected according to `auto_accept`, mirroring
/// `ble-link-cli`'s own `Registry`/`OnceCell` bootstrapping (the
/// `Communicator` doesn't exist yet at the point `Callbacks` has to be
/// built, so a request arriving before it's wired through resolves to a
/// harmless no-op).
async fn spawn_device(name: &str, auto_accept: bool, config: Config) -> Device {
    let (central, mut central_rx) = FakeCentralHost::new(format!("{name}-central"));
    let (peripheral, mut peripheral_rx) = FakePeripheralHost::new(format!("{name}-peripheral"));
    let peripheral_addr = format!("{name}-peripheral");

    let (found_tx, peer_found) = mpsc::unbounded_channel();
    let (success_tx, connection_success) = mpsc::unbounded_channel();
    let (failed_tx, connection_failed) = mpsc::unbounded_channel();
    let (lost_tx, connection_lost) = mpsc::unbounded_channel();
    let (resumed_tx, connection_resumed) = mpsc::unbounded_channel();
    let (disconnected_tx, disconnected) = mpsc::unbounded_channel();
    let (message_tx, message_received) = mpsc::unbounded_channel();
    let (data_tx, data_received) = mpsc::unbounded_channel();

    let self_ref: Arc<OnceCell<Arc<Communicator>>> = Arc::new(OnceCell::new());
    let request_ref = self_ref.clone();

    let callbacks = Callbacks::new()
        .with_on_peer_found(move |peer| {
            let _ = found_tx.send(peer);
        })
        .with_on_connection_request(move |peer| {
            let self_ref = request_ref.clone();
            tokio::spawn(async move {
                let Some(communicator) = self_ref.get() else { return };
                if auto_accept {
                    communicator.accept_connection(&peer).await;
                } else {
                    communicator.reject_connection(&peer).await;
                }
            });
        })
        .with_on_connection_success(move |peer, role| {
            let _ = success_tx.send((peer, role));
        })
        .with_on_connection_failed(move |peer, err| {
            let _ = failed_tx.send((peer, err.to_string()));
        })
        .with_on_connection_lost(move |peer| {
            let _ = lost_tx.send(peer);
        })
        .with_on_connection_resumed(move |peer| {
            let _ = resumed_tx.send(peer);
        })
        .with_on_disconnected(move |peer, peers_left| {
            let _ = disconnected_tx.send((peer, peers_left));
        })
        .with_on_message_received(move |message, role| {
            let _ = message_tx.send((message, role));
        })
        .with_on_data_received(move |data, role| {
            let _ = data_tx.send((data, role));
        });

    let communicator = Communicator::new(central.clone(), peripheral.clone(), name, config, callbacks);
    let _ = self_ref.set(communicator.clone());

    let central_comm = communicator.clone();
    tokio::spawn(async move {
        while let Some(event) = central_rx.recv().await {
            central_comm.on_central_event(event).await;
        }
    });
    let peripheral_comm = communicator.clone();
    tokio::spawn(async move {
        while let Some(event) = peripheral_rx.recv().await {
            peripheral_comm.on_peripheral_event(event).await;
        }
    });

    Device {
        name: name.to_string(),
        communicator,
        central,
        peripheral,
        peripheral_addr,
        events: Events {
            peer_found,
            connection_success,
            connection_failed,
            connection_lost,
            connection_resumed,
            disconnected,
            message_received,
            data_received,
        },
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn expect_silence<T>(rx: &mut mpsc::UnboundedReceiver<T>, quiet_for: Duration) {
    assert!(timeout(quiet_for, rx.recv()).await.is_err(), "expected no further event");
}

/// Like `recv`, but skips events that don't satisfy `pred` instead of
/// returning the first one, bounded by the same overall timeout.
async fn recv_matching<T>(rx: &mut mpsc::UnboundedReceiver<T>, pred: impl Fn(&T) -> bool) -> T {
    timeout(RECV_TIMEOUT, async {
        loop {
            let item = rx.recv().await.expect("event channel closed");
            if pred(&item) {
                return item;
            }
        }
    })
    .await
    .expect("timed out waiting for a matching event")
}

/// Link `alice` (CENTRAL) to `bob` (PERIPHERAL), advertise+discover+connect,
/// and wait for both sides to report success. Returns the `DeviceHandle`
/// alice used to reach bob, so a test can later simulate a hardware-level
/// drop directly against the fake host.
///
/// Re-scanning after a peer is already linked re-announces every
/// still-advertising peripheral the central has ever been linked to, not
/// just a newly linked one, so this waits for a `peer_found` matching
/// `bob`'s name specifically rather than taking whatever arrives first.
async fn connect_pair(alice: &mut Device, bob: &mut Device) -> DeviceHandle {
    link(&alice.central, &bob.peripheral).await;
    bob.communicator.start_advertising().await;
    alice.communicator.start_discovery().await;

    let discovered = recv_matching(&mut alice.events.peer_found, |peer| peer.unique_name() == bob.name).await;
    alice.communicator.stop_discovery().await;
    let device = discovered.device_handle().cloned().expect("scan result always carries a device handle");

    alice.communicator.connect(device.clone(), discovered.unique_name()).await;

    recv(&mut alice.events.connection_success).await;
    recv(&mut bob.events.connection_success).await;
    device
}

fn config_for_tests() -> Config {
    Config::new()
        .with_handshake_timeout(Duration::from_secs(2))
        .with_ack_timeout(Duration::from_millis(150))
        .with_disconnect_ack_timeout(Duration::from_millis(500))
        .with_reconnection_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn handshake_completes_and_a_single_chunk_message_round_trips() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;

    let message = Message::new("m", b"hello bob".to_vec()).unwrap();
    alice.communicator.send_message(message).await.unwrap();

    let (received, role) = recv(&mut bob.events.message_received).await;
    assert_eq!(received.header(), 'm');
    assert_eq!(received.payload, b"hello bob");
    assert_eq!(received.sender.as_ref().unwrap().unique_name(), "alice#01");
    assert_eq!(role, Role::Peripheral);
}

#[tokio::test]
async fn multi_chunk_message_reassembles_in_order_on_either_side() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;

    // 500 bytes plus a one-byte header comfortably spans three 184-byte
    // sub-messages, so this also exercises the PERIPHERAL -> CENTRAL
    // direction's explicit READ_RESPONSE ack (the CENTRAL side always
    // writes it, regardless of who's sending).
    let payload: Vec<u8> = (0..500).map(|i| (i % 251) as u8).collect();
    let message = Message::new("d", payload.clone()).unwrap();
    bob.communicator.send_message(message).await.unwrap();

    let (received, role) = recv(&mut alice.events.message_received).await;
    assert_eq!(received.header(), 'd');
    assert_eq!(received.payload, payload);
    assert_eq!(role, Role::Central);
}

#[tokio::test]
async fn binary_data_round_trips_without_a_header_byte() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;

    let payload = vec![0xAB; 300];
    alice.communicator.send_data(None, payload.clone()).await.unwrap();

    let (received, role) = recv(&mut bob.events.data_received).await;
    assert_eq!(received.sender.unique_name(), "alice#01");
    assert_eq!(received.payload, payload);
    assert_eq!(role, Role::Peripheral);
}

/// A lost `READ_RESPONSE_*` ack must not stall or duplicate-deliver a
/// PERIPHERAL-originated message: the send loop retransmits the unacked
/// sub-message after `ack_timeout`, and the receiver dedupes the
/// retransmit rather than firing `on_message_received` twice.
#[tokio::test]
async fn lost_ack_triggers_a_retransmit_that_is_deduped_on_arrival() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;

    // alice is CENTRAL for this link: her write of the text-stream
    // READ_RESPONSE ack back to bob is the one that goes missing.
    alice.central.drop_next_write(&bob.peripheral_addr, Characteristic::ReadResponseMessageReceived).await;

    let message = Message::new("m", b"once only".to_vec()).unwrap();
    bob.communicator.send_message(message).await.unwrap();

    let (received, _role) = recv(&mut alice.events.message_received).await;
    assert_eq!(received.payload, b"once only");

    expect_silence(&mut alice.events.message_received, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn connection_request_can_be_rejected() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", false, config).await;

    link(&alice.central, &bob.peripheral).await;
    bob.communicator.start_advertising().await;
    alice.communicator.start_discovery().await;

    let discovered = recv(&mut alice.events.peer_found).await;
    let device = discovered.device_handle().cloned().unwrap();
    alice.communicator.connect(device, discovered.unique_name()).await;

    let (peer, reason) = recv(&mut alice.events.connection_failed).await;
    assert_eq!(peer.unique_name(), "bob#01");
    assert!(reason.contains("rejected"), "unexpected rejection reason: {reason}");
}

/// An unwanted (not app-initiated) disconnect opens a reconnection window
/// on both sides; re-discovering the still-advertising peer within that
/// window resumes the same logical connection rather than requiring a
/// fresh app-level accept.
#[tokio::test]
async fn unwanted_disconnect_reconnects_once_the_peer_is_rediscovered() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config).await;

    let device = connect_pair(&mut alice, &mut bob).await;

    // Drop the hardware link out from under both channels, bypassing
    // `Communicator::disconnect` entirely, so neither side's `disconnecting`
    // flag is set and both treat it as unwanted.
    alice.central.disconnect(&device).await.unwrap();

    recv(&mut alice.events.connection_lost).await;
    recv(&mut bob.events.connection_lost).await;

    // bob is still advertising under the same name; re-scanning finds him
    // again and the CENTRAL side drives the reconnect automatically.
    alice.communicator.start_discovery().await;

    recv(&mut alice.events.connection_resumed).await;
    recv(&mut bob.events.connection_resumed).await;

    let message = Message::new("m", b"back online".to_vec()).unwrap();
    alice.communicator.send_message(message).await.unwrap();
    let (received, _role) = recv(&mut bob.events.message_received).await;
    assert_eq!(received.payload, b"back online");
}

/// A broadcast message (`receiver: None`) reaches every connected peer, not
/// just the one a prior unicast happened to target.
#[tokio::test]
async fn broadcast_message_reaches_every_connected_peer() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config.clone()).await;
    let mut carol = spawn_device("carol#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;
    connect_pair(&mut alice, &mut carol).await;

    let message = Message::new("m", b"to everyone".to_vec()).unwrap();
    assert!(message.is_broadcast());
    alice.communicator.send_message(message).await.unwrap();

    let (at_bob, _) = recv(&mut bob.events.message_received).await;
    let (at_carol, _) = recv(&mut carol.events.message_received).await;
    assert_eq!(at_bob.payload, b"to everyone");
    assert_eq!(at_carol.payload, b"to everyone");
}

/// A unicast message (`receiver: Some(peer)`) reaches only that peer.
#[tokio::test]
async fn unicast_message_is_filtered_to_its_receiver() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config.clone()).await;
    let mut carol = spawn_device("carol#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;
    connect_pair(&mut alice, &mut carol).await;

    let bob_peer = Peer::new("bob#01");
    let message = Message::new("m", b"just for bob".to_vec()).unwrap().with_receiver(bob_peer);
    alice.communicator.send_message(message).await.unwrap();

    let (at_bob, _) = recv(&mut bob.events.message_received).await;
    assert_eq!(at_bob.payload, b"just for bob");
    expect_silence(&mut carol.events.message_received, Duration::from_millis(500)).await;
}

/// `Communicator::destroy` cascades `STATE_DISCONNECTED` into every live
/// channel: both sides see `on_disconnected` fire without either one calling
/// `disconnect()` itself.
#[tokio::test]
async fn destroy_cascades_disconnection_to_the_peer() {
    let config = config_for_tests();
    let mut alice = spawn_device("alice#01", true, config.clone()).await;
    let mut bob = spawn_device("bob#01", true, config).await;

    connect_pair(&mut alice, &mut bob).await;

    alice.communicator.destroy().await;

    let (peer, peers_left) = recv(&mut alice.events.disconnected).await;
    assert_eq!(peer.unique_name(), "bob#01");
    assert_eq!(peers_left, 0);

    let (peer, peers_left) = recv(&mut bob.events.disconnected).await;
    assert_eq!(peer.unique_name(), "alice#01");
    assert_eq!(peers_left, 0);
}
