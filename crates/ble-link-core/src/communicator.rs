//! Top-level facade: owns both role `Connection`s, the advertise/scan
//! lifecycle, the global outbound queues, and the radio-state observer.
//!
//! Every public operation here returns a `CommandOutcome` rather than a
//! `Result`, so application glue can match on stable codes instead of
//! threading error types through the FFI/UI boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{info, warn};

use crate::callbacks::Callbacks;
use crate::channel::{Channel, Role};
use crate::config::Config;
use crate::connection::Connection;
use crate::error::{CommandOutcome, Error, Result};
use crate::host::{CentralHost, Characteristic, DeviceHandle, HostEvent, PeripheralHost};
use crate::message::{DataMessage, Message};
use crate::peer::Peer;

/// One queued outbound item awaiting its turn on a global stream queue.
enum QueueItem {
    Message(Message),
    Data { receiver: Option<Peer>, payload: Vec<u8> },
}

struct PendingSend {
    item: QueueItem,
    done: Option<oneshot::Sender<Result<()>>>,
}

/// Transient/durable lifecycle flags, all guarded by one mutex so a
/// start/stop race can't leave them inconsistent with each other.
#[derive(Debug, Default)]
struct RadioState {
    advertising: bool,
    discovering: bool,
    turning_on: bool,
    turning_off: bool,
    restarting: bool,
    destroying: bool,
    radio_on: bool,
}

/// Owns the whole BLE link lifecycle for one local device.
pub struct Communicator {
    central: Arc<Connection>,
    peripheral: Arc<Connection>,
    callbacks: Arc<Callbacks>,
    unique_name: Mutex<String>,
    radio: Mutex<RadioState>,
    text_queue: Mutex<VecDeque<PendingSend>>,
    data_queue: Mutex<VecDeque<PendingSend>>,
    queue_signal: Arc<Notify>,
    destroyed: Arc<AtomicBool>,
}

impl Communicator {
    pub fn new(
        central_host: Arc<dyn CentralHost>,
        peripheral_host: Arc<dyn PeripheralHost>,
        unique_name: impl Into<String>,
        config: Config,
        callbacks: Callbacks,
    ) -> Arc<Self> {
        let unique_name = unique_name.into();
        let callbacks = Arc::new(callbacks);
        let central = Connection::new_central(central_host, config.clone(), callbacks.clone(), unique_name.clone());
        let peripheral = Connection::new_peripheral(peripheral_host, config.clone(), callbacks.clone(), unique_name.clone());

        let communicator = Arc::new(Self {
            central,
            peripheral,
            callbacks,
            unique_name: Mutex::new(unique_name),
            radio: Mutex::new(RadioState { radio_on: true, ..Default::default() }),
            text_queue: Mutex::new(VecDeque::new()),
            data_queue: Mutex::new(VecDeque::new()),
            queue_signal: Arc::new(Notify::new()),
            destroyed: Arc::new(AtomicBool::new(false)),
        });

        let drain_text = communicator.clone();
        tokio::spawn(async move { drain_text.drain_queue_loop(true).await });
        let drain_data = communicator.clone();
        tokio::spawn(async move { drain_data.drain_queue_loop(false).await });

        communicator
    }

    // ---------------------------------------------------------------
    // Advertise / discovery lifecycle
    // ---------------------------------------------------------------

    pub async fn start_advertising(&self) -> CommandOutcome {
        let mut radio = self.radio.lock().await;
        if radio.destroying {
            return CommandOutcome::Destroying;
        }
        if radio.advertising {
            return CommandOutcome::AlreadyStarted;
        }
        let name = self.unique_name.lock().await.clone();
        match self.peripheral_host().start_advertising(&name).await {
            Ok(()) => {
                radio.advertising = true;
                drop(radio);
                self.callbacks.fire_advertise_started();
                CommandOutcome::Success
            }
            Err(err) => {
                warn!(error = %err, "start_advertising failed");
                CommandOutcome::Error
            }
        }
    }

    pub async fn stop_advertising(&self) -> CommandOutcome {
        let mut radio = self.radio.lock().await;
        if !radio.advertising {
            return CommandOutcome::AlreadyStopped;
        }
        match self.peripheral_host().stop_advertising().await {
            Ok(()) => {
                radio.advertising = false;
                drop(radio);
                self.callbacks.fire_advertise_stopped();
                CommandOutcome::Success
            }
            Err(err) => {
                warn!(error = %err, "stop_advertising failed");
                CommandOutcome::Error
            }
        }
    }

    pub async fn start_discovery(&self) -> CommandOutcome {
        let mut radio = self.radio.lock().await;
        if radio.destroying {
            return CommandOutcome::Destroying;
        }
        if radio.discovering {
            return CommandOutcome::AlreadyStarted;
        }
        match self.central_host().start_scan().await {
            Ok(()) => {
                radio.discovering = true;
                drop(radio);
                self.callbacks.fire_discovery_started();
                CommandOutcome::Success
            }
            Err(err) => {
                warn!(error = %err, "start_discovery failed");
                CommandOutcome::Error
            }
        }
    }

    /// Stopping discovery while it isn't running reports `AlreadyStopped`
    /// rather than an error.
    pub async fn stop_discovery(&self) -> CommandOutcome {
        let mut radio = self.radio.lock().await;
        if !radio.discovering {
            return CommandOutcome::AlreadyStopped;
        }
        match self.central_host().stop_scan().await {
            Ok(()) => {
                radio.discovering = false;
                drop(radio);
                self.callbacks.fire_discovery_stopped();
                CommandOutcome::Success
            }
            Err(err) => {
                warn!(error = %err, "stop_discovery failed");
                CommandOutcome::Error
            }
        }
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    pub async fn connect(&self, device: DeviceHandle, unique_name: impl Into<String>) -> CommandOutcome {
        if self.radio.lock().await.destroying {
            return CommandOutcome::Destroying;
        }
        let peer = Peer::new(unique_name).with_device_handle(device.clone());
        self.central.request_connect(device, peer).await;
        CommandOutcome::Success
    }

    /// Accept/reject always answer a request that arrived on one of this
    /// side's PERIPHERAL-role channels.
    pub async fn accept_connection(&self, peer: &Peer) -> CommandOutcome {
        self.answer_connection_request(peer, true).await
    }

    pub async fn reject_connection(&self, peer: &Peer) -> CommandOutcome {
        self.answer_connection_request(peer, false).await
    }

    async fn answer_connection_request(&self, peer: &Peer, accept: bool) -> CommandOutcome {
        let Some(channel) = self.peripheral.channel_for(peer).await else {
            return CommandOutcome::Error;
        };
        match channel.respond_to_connection(accept).await {
            Ok(()) => CommandOutcome::Success,
            Err(err) => {
                warn!(error = %err, "answering connection request failed");
                CommandOutcome::Error
            }
        }
    }

    pub async fn disconnect(&self, peer: &Peer) -> CommandOutcome {
        let central_result = self.central.disconnect(peer).await;
        let peripheral_result = self.peripheral.disconnect(peer).await;
        match (central_result, peripheral_result) {
            (Ok(()), _) | (_, Ok(())) => CommandOutcome::Success,
            (Err(Error::PeerNotFound { .. }), Err(Error::PeerNotFound { .. })) => {
                CommandOutcome::Error
            }
            (Err(err), _) => {
                warn!(error = %err, "disconnect failed");
                CommandOutcome::Error
            }
        }
    }

    pub async fn disconnect_from_all(&self) -> CommandOutcome {
        self.central.disconnect_all().await;
        self.peripheral.disconnect_all().await;
        CommandOutcome::Success
    }

    pub async fn set_name(&self, new_unique_name: impl Into<String>) -> CommandOutcome {
        let new_unique_name = new_unique_name.into();
        *self.unique_name.lock().await = new_unique_name.clone();
        if let Err(err) = self.peripheral_host().update_advertised_name(&new_unique_name).await {
            warn!(error = %err, "update_advertised_name failed");
        }
        if let Err(err) = self.central.update_name(&new_unique_name).await {
            warn!(error = %err, "propagating name update to CENTRAL channels failed");
        }
        if let Err(err) = self.peripheral.update_name(&new_unique_name).await {
            warn!(error = %err, "propagating name update to PERIPHERAL channels failed");
        }
        CommandOutcome::Success
    }

    pub async fn destroy(self: &Arc<Self>) -> CommandOutcome {
        {
            let mut radio = self.radio.lock().await;
            if radio.destroying {
                return CommandOutcome::AlreadyStarted;
            }
            radio.destroying = true;
        }
        self.destroyed.store(true, Ordering::SeqCst);
        self.central.destroy().await;
        self.peripheral.destroy().await;
        self.queue_signal.notify_waiters();
        CommandOutcome::Success
    }

    // ---------------------------------------------------------------
    // Sending (two global serial queues, one per stream kind)
    // ---------------------------------------------------------------

    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.enqueue(true, QueueItem::Message(message)).await
    }

    pub async fn send_data(&self, receiver: Option<Peer>, payload: Vec<u8>) -> Result<()> {
        self.enqueue(false, QueueItem::Data { receiver, payload }).await
    }

    async fn enqueue(&self, text: bool, item: QueueItem) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Destroying);
        }
        let (tx, rx) = oneshot::channel();
        let pending = PendingSend { item, done: Some(tx) };
        if text {
            self.text_queue.lock().await.push_back(pending);
        } else {
            self.data_queue.lock().await.push_back(pending);
        }
        self.queue_signal.notify_waiters();
        rx.await.map_err(|_| Error::Destroying)?
    }

    /// CENTRAL.sendMessage -> then PERIPHERAL.sendMessage -> pop -> next, one
    /// item at a time, independently for the text and binary queues.
    async fn drain_queue_loop(self: Arc<Self>, text: bool) {
        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }
            let next = {
                let queue = if text { &self.text_queue } else { &self.data_queue };
                queue.lock().await.pop_front()
            };
            let Some(mut pending) = next else {
                self.queue_signal.notified().await;
                continue;
            };

            let result = match &pending.item {
                QueueItem::Message(message) => {
                    let central_result = self.central.send_message(message).await;
                    let peripheral_result = self.peripheral.send_message(message).await;
                    central_result.and(peripheral_result)
                }
                QueueItem::Data { receiver, payload } => {
                    let central_result = self.central.send_data(receiver.clone(), payload).await;
                    let peripheral_result = self.peripheral.send_data(receiver.clone(), payload).await;
                    central_result.and(peripheral_result)
                }
            };

            if let Some(done) = pending.done.take() {
                let _ = done.send(result);
            }
        }
    }

    // ---------------------------------------------------------------
    // Radio-state observer
    // ---------------------------------------------------------------

    pub async fn on_radio_state_changed(self: &Arc<Self>, on: bool) {
        let mut radio = self.radio.lock().await;
        radio.radio_on = on;

        if !on {
            if radio.restarting {
                drop(radio);
                if let Err(err) = self.central_host().start_scan().await {
                    warn!(error = %err, "radio restart: re-enabling scan failed");
                }
            }
            return;
        }

        let was_restarting = radio.restarting;
        radio.restarting = false;
        radio.turning_on = false;
        drop(radio);

        if was_restarting {
            let has_reconnecting = !self.central.get_reconnecting_peers().await.is_empty()
                || !self.peripheral.get_reconnecting_peers().await.is_empty();
            if has_reconnecting {
                let _ = self.start_advertising().await;
                let _ = self.start_discovery().await;
            }
        }
    }

    /// The OS never reported `STATE_DISCONNECTED` for a requested
    /// disconnect. Forces teardown by toggling the radio; implementations targeting
    /// modern OS BLE stacks may instead just surface the failure and return
    /// here without toggling anything.
    pub async fn on_disconnection_failed(self: &Arc<Self>, peer: Peer) {
        self.callbacks.fire_disconnection_failed(peer);
        let mut radio = self.radio.lock().await;
        if radio.restarting {
            return;
        }
        radio.restarting = true;
        drop(radio);
        info!("forcing radio restart after a failed disconnect");
        if let Err(err) = self.central_host().stop_scan().await {
            warn!(error = %err, "forced radio restart: stop_scan failed");
        }
    }

    // ---------------------------------------------------------------
    // Host-event dispatch
    // ---------------------------------------------------------------

    /// Route one `HostEvent` observed on the CENTRAL adapter to the matching
    /// channel, or to peer-discovery handling for `ScanResult`.
    pub async fn on_central_event(self: &Arc<Self>, event: HostEvent) {
        match event {
            HostEvent::ScanResult { device, unique_name } => self.handle_scan_result(device, unique_name).await,
            HostEvent::RadioStateChanged { on } => self.on_radio_state_changed(on).await,
            other => self.dispatch_to_channel(&self.central, other).await,
        }
    }

    /// Route one `HostEvent` observed on the PERIPHERAL adapter.
    pub async fn on_peripheral_event(self: &Arc<Self>, event: HostEvent) {
        if let HostEvent::LinkUp { device } = event {
            self.peripheral.attach_peripheral_channel(device).await;
            return;
        }
        self.dispatch_to_channel(&self.peripheral, event).await;
    }

    async fn handle_scan_result(self: &Arc<Self>, device: DeviceHandle, unique_name: Option<String>) {
        let Some(unique_name) = unique_name else { return };
        if let Some(channel) = self.central.reconnecting_channel_for_name(&unique_name).await {
            if channel.begin_requesting_reconnection(device.clone()).await {
                let peer = channel.peer_snapshot().await;
                self.central.request_reconnect(device, peer).await;
            }
            return;
        }
        let peer = Peer::new(unique_name).with_device_handle(device);
        self.callbacks.fire_peer_found(peer);
    }

    async fn dispatch_to_channel(self: &Arc<Self>, connection: &Arc<Connection>, event: HostEvent) {
        let device = match &event {
            HostEvent::LinkUp { device }
            | HostEvent::LinkDown { device }
            | HostEvent::DisconnectConfirmed { device }
            | HostEvent::WriteAcked { device, .. }
            | HostEvent::ValueReceived { device, .. }
            | HostEvent::MtuChanged { device, .. } => device.clone(),
            HostEvent::ScanResult { .. } | HostEvent::RadioStateChanged { .. } => return,
        };

        let Some(channel) = connection.channel_by_device(&device).await else {
            return;
        };

        match event {
            HostEvent::LinkDown { .. } => channel.on_hardware_disconnected().await,
            HostEvent::DisconnectConfirmed { .. } => channel.on_hardware_disconnected().await,
            HostEvent::WriteAcked { characteristic, .. } => channel.on_write_acked(characteristic).await,
            HostEvent::MtuChanged { mtu, .. } => {
                if channel.role() == Role::Central {
                    let _ = channel.on_mtu_response(mtu).await;
                }
            }
            HostEvent::ValueReceived { characteristic, data, .. } => {
                self.dispatch_value(&channel, &device, characteristic, data).await
            }
            HostEvent::LinkUp { .. } | HostEvent::ScanResult { .. } | HostEvent::RadioStateChanged { .. } => {}
        }

        connection.prune_destroyed().await;
    }

    async fn dispatch_value(&self, channel: &Arc<Channel>, device: &DeviceHandle, characteristic: Characteristic, data: Vec<u8>) {
        match characteristic {
            Characteristic::MtuRequest => {
                let _ = data;
                if let Ok(link_mtu) = self.peripheral_host().current_mtu(device).await {
                    let _ = channel.on_mtu_request(link_mtu).await;
                }
            }
            Characteristic::MtuResponse => {
                let mtu = u32::from_be_bytes(data.as_slice().try_into().unwrap_or([0; 4])) as usize;
                let _ = channel.on_mtu_response(mtu).await;
            }
            Characteristic::ConnectionRequest => {
                if let Ok(unique_name) = String::from_utf8(data) {
                    channel.on_connection_request(unique_name).await;
                }
            }
            Characteristic::ConnectionResponse => {
                let accepted = data.first() == Some(&b'0');
                channel.on_connection_response(accepted).await;
            }
            Characteristic::MessageReceive | Characteristic::MessageSend => {
                if let Ok(sub) = crate::submessage::SubMessage::decode(&data) {
                    if let Some(message) = channel.on_sub_message(sub).await {
                        self.callbacks.fire_message_received(message, channel.role());
                    }
                }
            }
            Characteristic::DataReceive | Characteristic::DataSend => {
                if let Ok(sub) = crate::submessage::SubMessage::decode(&data) {
                    if let Some(payload) = channel.on_data_sub_message(sub).await {
                        let peer = channel.peer_snapshot().await;
                        self.callbacks.fire_data_received(DataMessage::received(peer, payload), channel.role());
                    }
                }
            }
            Characteristic::ReadResponseMessageReceived | Characteristic::ReadResponseDataReceived => {
                if data.len() >= 7 {
                    if let (Some(message_id), Some(sub_sequence)) = (
                        crate::sequence::SequenceNumber::from_bytes(&data[0..4]),
                        crate::sequence::SequenceNumber::from_bytes(&data[4..7]),
                    ) {
                        let stream = if characteristic == Characteristic::ReadResponseMessageReceived {
                            crate::channel::StreamKind::Text
                        } else {
                            crate::channel::StreamKind::Data
                        };
                        channel.on_ack_received(stream, message_id, sub_sequence).await;
                    }
                }
            }
            Characteristic::NameUpdateReceive | Characteristic::NameUpdateSend => {
                if let Ok(new_name) = String::from_utf8(data) {
                    let (old, new) = channel.on_name_update(new_name).await;
                    self.callbacks.fire_peer_updated(old, new);
                }
            }
            Characteristic::DisconnectionReceive | Characteristic::DisconnectionSend => {
                let _ = channel.on_disconnection_requested().await;
            }
            Characteristic::ConnectionResumedReceive | Characteristic::ConnectionResumedSend => {}
        }
    }

    fn central_host(&self) -> Arc<dyn CentralHost> {
        self.central.central_host_ref()
    }

    fn peripheral_host(&self) -> Arc<dyn PeripheralHost> {
        self.peripheral.peripheral_host_ref()
    }
}
