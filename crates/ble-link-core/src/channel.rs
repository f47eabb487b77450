//! One live link to one peer: handshake, reliable send, receive &
//! reassembly, disconnection and reconnection.
//!
//! A `Channel` owns a single serial task per stream kind (text, data) so
//! sends on that stream are strictly ordered and never exceed one in-flight
//! sub-message, matching the one-outstanding-GATT-operation-per-connection
//! rule. The handshake and disconnect state machines run on the channel's
//! shared `Inner` lock instead of a task of their own, since they're driven
//! entirely by a handful of host events rather than a retry loop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::host::{CentralHost, Characteristic, DeviceHandle, PeripheralHost};
use crate::message::Message;
use crate::peer::Peer;
use crate::sequence::SequenceNumber;
use crate::submessage::{SubMessage, SubMessageType};
use crate::timer::Timer;

/// BLE role this side of the link plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

/// Independent outbound/inbound data stream. Text and binary traffic use
/// disjoint characteristics and queues, so they're independently ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Text,
    Data,
}

impl StreamKind {
    /// Characteristic the local `role` writes (CENTRAL) or notifies
    /// (PERIPHERAL) to send on this stream.
    fn send_characteristic(self, role: Role) -> Characteristic {
        match (self, role) {
            (StreamKind::Text, Role::Central) => Characteristic::MessageReceive,
            (StreamKind::Text, Role::Peripheral) => Characteristic::MessageSend,
            (StreamKind::Data, Role::Central) => Characteristic::DataReceive,
            (StreamKind::Data, Role::Peripheral) => Characteristic::DataSend,
        }
    }

    /// The app-level ack characteristic for this stream. Bidirectional: the
    /// CENTRAL writes it after receiving on the PERIPHERAL's notify-side
    /// characteristic, the PERIPHERAL notifies it after receiving on the
    /// CENTRAL's write-side characteristic.
    fn ack_characteristic(self) -> Characteristic {
        match self {
            StreamKind::Text => Characteristic::ReadResponseMessageReceived,
            StreamKind::Data => Characteristic::ReadResponseDataReceived,
        }
    }
}

/// In-progress reassembly of one inbound message.
struct PartialMessage {
    payload: Vec<u8>,
    last_sub_seq: SequenceNumber,
}

/// Per-stream send/receive state.
struct StreamState {
    queue: VecDeque<QueuedSend>,
    outgoing_message_id: SequenceNumber,
    in_flight: Option<SubMessage>,
    ack_notify: Arc<Notify>,
    receiving: HashMap<SequenceNumber, PartialMessage>,
    recently_delivered: VecDeque<SequenceNumber>,
    dedupe_capacity: usize,
}

impl StreamState {
    fn new(dedupe_capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            outgoing_message_id: SequenceNumber::zero(4),
            in_flight: None,
            ack_notify: Arc::new(Notify::new()),
            receiving: HashMap::new(),
            recently_delivered: VecDeque::new(),
            dedupe_capacity,
        }
    }

    fn mark_delivered(&mut self, id: SequenceNumber) {
        if self.recently_delivered.contains(&id) {
            return;
        }
        if self.recently_delivered.len() >= self.dedupe_capacity {
            self.recently_delivered.pop_front();
        }
        self.recently_delivered.push_back(id);
    }
}

/// One queued outbound message awaiting its turn on a stream's serial drain
/// loop.
struct QueuedSend {
    subs: VecDeque<SubMessage>,
    done: Option<oneshot::Sender<Result<()>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshaking,
    Connected,
    Reconnecting,
    Disconnecting,
}

enum HostHandle {
    Central(Arc<dyn CentralHost>),
    Peripheral(Arc<dyn PeripheralHost>),
}

struct Inner {
    peer: Peer,
    state: State,
    streams: HashMap<StreamKind, StreamState>,
    handshake_timer: Option<Timer>,
    reconnection_timer: Option<Timer>,
}

/// A live link to one remote peer.
pub struct Channel {
    role: Role,
    config: Config,
    callbacks: Arc<Callbacks>,
    host: HostHandle,
    connection: Weak<Connection>,
    resumed: Arc<Notify>,
    destroyed: Arc<Notify>,
    disconnect_ack: Arc<Notify>,
    local_name: Mutex<String>,
    inner: Mutex<Inner>,
}

impl Channel {
    fn new(
        role: Role,
        host: HostHandle,
        connection: Weak<Connection>,
        peer: Peer,
        config: Config,
        callbacks: Arc<Callbacks>,
        local_name: String,
    ) -> Arc<Self> {
        let mut streams = HashMap::new();
        streams.insert(StreamKind::Text, StreamState::new(config.dedupe_ring_size));
        streams.insert(StreamKind::Data, StreamState::new(config.dedupe_ring_size));

        let channel = Arc::new(Self {
            role,
            config,
            callbacks,
            host,
            connection,
            resumed: Arc::new(Notify::new()),
            destroyed: Arc::new(Notify::new()),
            disconnect_ack: Arc::new(Notify::new()),
            local_name: Mutex::new(local_name),
            inner: Mutex::new(Inner {
                peer,
                state: State::Handshaking,
                streams,
                handshake_timer: None,
                reconnection_timer: None,
            }),
        });

        for stream in [StreamKind::Text, StreamKind::Data] {
            let channel = channel.clone();
            tokio::spawn(async move { channel.drain_loop(stream).await });
        }

        channel
    }

    /// Construct the CENTRAL-side channel immediately after an outbound
    /// `connect` ack and begin the handshake.
    pub fn new_central(
        host: Arc<dyn CentralHost>,
        connection: Weak<Connection>,
        peer: Peer,
        config: Config,
        callbacks: Arc<Callbacks>,
        local_name: impl Into<String>,
    ) -> Arc<Self> {
        let channel =
            Self::new(Role::Central, HostHandle::Central(host), connection, peer, config, callbacks, local_name.into());
        let c = channel.clone();
        tokio::spawn(async move { c.begin_central_handshake().await });
        channel
    }

    /// Construct the PERIPHERAL-side channel on an inbound link-up event
    /// with only a `device_handle` known.
    pub fn new_peripheral(
        host: Arc<dyn PeripheralHost>,
        connection: Weak<Connection>,
        device_handle: DeviceHandle,
        config: Config,
        callbacks: Arc<Callbacks>,
        local_name: impl Into<String>,
    ) -> Arc<Self> {
        let peer = Peer::new("").with_device_handle(device_handle);
        let channel = Self::new(
            Role::Peripheral,
            HostHandle::Peripheral(host),
            connection,
            peer,
            config,
            callbacks,
            local_name.into(),
        );
        let timer_channel = channel.clone();
        let timeout = channel.config.handshake_timeout;
        tokio::spawn(async move {
            let mut inner = timer_channel.inner.lock().await;
            let c = timer_channel.clone();
            inner.handshake_timer = Some(Timer::start(timeout, move || {
                let c = c.clone();
                tokio::spawn(async move { c.handshake_timed_out().await });
            }));
        });
        channel
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn peer_snapshot(&self) -> Peer {
        self.inner.lock().await.peer.clone()
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    pub async fn is_reconnecting(&self) -> bool {
        self.inner.lock().await.peer.reconnecting
    }

    // ---------------------------------------------------------------
    // Handshake
    // ---------------------------------------------------------------

    async fn begin_central_handshake(self: Arc<Self>) {
        let host = self.central_host();
        let device = { self.inner.lock().await.peer.device_handle().cloned() };
        let Some(device) = device else { return };

        {
            let mut inner = self.inner.lock().await;
            let c = self.clone();
            let timeout = self.config.handshake_timeout;
            inner.handshake_timer = Some(Timer::start(timeout, move || {
                let c = c.clone();
                tokio::spawn(async move { c.handshake_timed_out().await });
            }));
        }

        if let Err(err) = host.subscribe(&device, Characteristic::MtuResponse).await {
            warn!(peer = %device.address(), error = %err, "handshake: subscribe to MTU_RESPONSE failed");
            return;
        }
        let probe = vec![0u8; self.config.target_mtu];
        if let Err(err) = host.write(&device, Characteristic::MtuRequest, &probe).await {
            warn!(peer = %device.address(), error = %err, "handshake: MTU_REQUEST write failed");
        }
    }

    /// CENTRAL: `MTU_RESPONSE` notification reported `reported_mtu` usable
    /// bytes. Request an upgrade only if it's short of the target.
    pub async fn on_mtu_response(self: &Arc<Self>, reported_mtu: usize) -> Result<()> {
        let host = self.central_host();
        let device = self.require_device().await?;
        for characteristic in [
            Characteristic::ConnectionResponse,
            Characteristic::MessageSend,
            Characteristic::DataSend,
            Characteristic::NameUpdateSend,
            Characteristic::ConnectionResumedSend,
            Characteristic::DisconnectionSend,
        ] {
            host.subscribe(&device, characteristic).await?;
        }
        if reported_mtu < 200 {
            host.request_mtu(&device, self.config.target_mtu).await?;
        }
        let unique_name = self.local_unique_name().await;
        host.write(&device, Characteristic::ConnectionRequest, unique_name.as_bytes()).await?;
        Ok(())
    }

    /// CENTRAL: a `CONNECTION_RESPONSE` notification arrived.
    pub async fn on_connection_response(self: &Arc<Self>, accepted: bool) {
        {
            let mut inner = self.inner.lock().await;
            inner.handshake_timer = None;
        }
        if !accepted {
            let peer = self.peer_snapshot().await;
            self.callbacks.fire_connection_failed(peer, Error::ConnectionRejected { peer: String::new() });
            return;
        }

        // Reconnection handshakes skip the app-level accept/reject entirely:
        // acceptance is automatic when `requesting_reconnection`.
        if self.inner.lock().await.peer.reconnecting {
            self.on_reconnected().await;
            return;
        }

        let peer = {
            let mut inner = self.inner.lock().await;
            inner.peer.connected = true;
            inner.state = State::Connected;
            inner.peer.clone()
        };
        info!(peer = %peer.unique_name(), "connection accepted");
        self.resumed.notify_waiters();
        self.callbacks.fire_connection_success(peer, self.role);
    }

    /// PERIPHERAL: `MTU_REQUEST` write arrived; reply with the live MTU.
    pub async fn on_mtu_request(&self, link_mtu: usize) -> Result<()> {
        let host = self.peripheral_host();
        let device = self.require_device().await?;
        host.notify(&device, Characteristic::MtuResponse, &(link_mtu as u32).to_be_bytes()).await
    }

    /// PERIPHERAL: `CONNECTION_REQUEST` write arrived carrying the peer's
    /// `unique_name`. If this channel is mid-reconnection, the request is
    /// accepted automatically without surfacing `on_connection_request`.
    pub async fn on_connection_request(self: &Arc<Self>, unique_name: String) {
        let (peer, resuming) = {
            let mut inner = self.inner.lock().await;
            inner.peer.set_unique_name(unique_name);
            (inner.peer.clone(), inner.peer.reconnecting)
        };
        if resuming {
            let _ = self.respond_to_connection(true).await;
        } else {
            self.callbacks.fire_connection_request(peer);
        }
    }

    /// PERIPHERAL: the app decided (or the reconnection auto-accept path
    /// decided for it). Writes `'0'`/`'1'` to `CONNECTION_RESPONSE`.
    pub async fn respond_to_connection(self: &Arc<Self>, accept: bool) -> Result<()> {
        let host = self.peripheral_host();
        let device = self.require_device().await?;
        let byte = if accept { b'0' } else { b'1' };
        host.notify(&device, Characteristic::ConnectionResponse, &[byte]).await?;

        if !accept {
            self.inner.lock().await.state = State::Disconnecting;
            return Ok(());
        }

        if self.inner.lock().await.peer.reconnecting {
            self.on_reconnected().await;
            return Ok(());
        }

        let peer = {
            let mut inner = self.inner.lock().await;
            inner.peer.connected = true;
            inner.state = State::Connected;
            inner.handshake_timer = None;
            inner.peer.clone()
        };
        info!(peer = %peer.unique_name(), "connection accepted");
        self.resumed.notify_waiters();
        self.callbacks.fire_connection_success(peer, self.role);
        Ok(())
    }

    async fn handshake_timed_out(self: Arc<Self>) {
        let peer = self.peer_snapshot().await;
        warn!(peer = %peer.unique_name(), "handshake timed out");
        self.callbacks.fire_connection_failed(peer, Error::HandshakeTimeout { peer: String::new() });
        self.teardown_after_handshake_failure().await;
    }

    async fn teardown_after_handshake_failure(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        inner.state = State::Disconnecting;
        inner.handshake_timer = None;
    }

    // ---------------------------------------------------------------
    // Reliable send loop
    // ---------------------------------------------------------------

    pub async fn send_message(self: &Arc<Self>, message: &Message) -> Result<()> {
        self.enqueue(StreamKind::Text, message.header_and_payload()).await
    }

    pub async fn send_data(self: &Arc<Self>, payload: &[u8]) -> Result<()> {
        self.enqueue(StreamKind::Data, payload.to_vec()).await
    }

    pub async fn set_local_name(&self, unique_name: impl Into<String>) {
        *self.local_name.lock().await = unique_name.into();
    }

    async fn enqueue(self: &Arc<Self>, stream: StreamKind, data: Vec<u8>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            if inner.peer.disconnecting {
                return Err(Error::PeerNotFound { peer: inner.peer.unique_name().to_string() });
            }
            let state = inner.streams.get_mut(&stream).unwrap();
            let message_id = state.outgoing_message_id;
            state.outgoing_message_id.increment();
            let subs = crate::message::split_data_into_sub_messages(message_id, &data);
            state.queue.push_back(QueuedSend { subs: subs.into(), done: Some(tx) });
        }
        self.resumed.notify_waiters();
        rx.await.map_err(|_| Error::Destroying)?
    }

    async fn drain_loop(self: Arc<Self>, stream: StreamKind) {
        loop {
            let ready = { self.inner.lock().await.state == State::Connected };
            if !ready {
                tokio::select! {
                    _ = self.resumed.notified() => continue,
                    _ = self.destroyed.notified() => return,
                }
            }

            let next = {
                let mut inner = self.inner.lock().await;
                inner.streams.get_mut(&stream).and_then(|s| s.queue.pop_front())
            };
            let Some(mut queued) = next else {
                tokio::select! {
                    _ = self.resumed.notified() => continue,
                    _ = self.destroyed.notified() => return,
                }
            };

            let mut failed = false;
            while let Some(sub) = queued.subs.pop_front() {
                if self.send_sub_message_until_acked(stream, sub).await.is_err() {
                    failed = true;
                    break;
                }
            }
            if let Some(done) = queued.done.take() {
                let _ = done.send(if failed { Err(Error::Destroying) } else { Ok(()) });
            }
        }
    }

    async fn send_sub_message_until_acked(self: &Arc<Self>, stream: StreamKind, sub: SubMessage) -> Result<()> {
        let ack_notify = {
            let mut inner = self.inner.lock().await;
            let state = inner.streams.get_mut(&stream).unwrap();
            state.in_flight = Some(sub.clone());
            state.ack_notify.clone()
        };

        loop {
            if self.inner.lock().await.state != State::Connected {
                return Err(Error::PeerNotFound { peer: String::new() });
            }
            self.write_or_notify(stream.send_characteristic(self.role), &sub.encode()).await?;
            let acked = tokio::time::timeout(self.config.ack_timeout, ack_notify.notified()).await;
            if acked.is_ok() {
                debug!(message_id = sub.message_id.value(), sub_sequence = sub.sub_sequence.value(), "sub-message acked");
                break;
            }
            debug!(message_id = sub.message_id.value(), sub_sequence = sub.sub_sequence.value(), "ack timeout, retransmitting");
        }

        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.streams.get_mut(&stream) {
            state.in_flight = None;
        }
        Ok(())
    }

    async fn write_or_notify(&self, characteristic: Characteristic, data: &[u8]) -> Result<()> {
        let device = self.require_device().await?;
        match &self.host {
            HostHandle::Central(host) => host.write(&device, characteristic, data).await,
            HostHandle::Peripheral(host) => host.notify(&device, characteristic, data).await,
        }
    }

    /// A link-layer write/notify-completed callback arrived. The only
    /// in-flight-frame ack this alone ever resolves is the disconnect
    /// handshake's; a sent sub-message isn't considered delivered until the
    /// peer's explicit application-level ack arrives (`on_ack_received`).
    pub async fn on_write_acked(&self, characteristic: Characteristic) {
        let disconnect_characteristic = match self.role {
            Role::Central => Characteristic::DisconnectionReceive,
            Role::Peripheral => Characteristic::DisconnectionSend,
        };
        if characteristic == disconnect_characteristic {
            self.disconnect_ack.notify_one();
        }
    }

    /// An explicit application-level ack (`READ_RESPONSE_*`) arrived,
    /// carrying `message_id ‖ sub_sequence`. Meaningful to either role's
    /// sender, since the ack characteristic is bidirectional.
    pub async fn on_ack_received(&self, stream: StreamKind, message_id: SequenceNumber, sub_sequence: SequenceNumber) {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.streams.get_mut(&stream) else { return };
        let matches = state
            .in_flight
            .as_ref()
            .map(|s| s.message_id == message_id && s.sub_sequence == sub_sequence)
            .unwrap_or(false);
        if matches {
            state.ack_notify.notify_one();
        }
    }

    // ---------------------------------------------------------------
    // Receive & reassembly
    // ---------------------------------------------------------------

    /// Inbound sub-message arrived on the TEXT stream. Returns the
    /// reassembled message if this was the final chunk of a newly completed
    /// message; the leading byte(s) of the reassembled payload are the
    /// message header.
    pub async fn on_sub_message(self: &Arc<Self>, sub: SubMessage) -> Option<Message> {
        let completed = self.reassemble_and_ack(StreamKind::Text, sub).await?;
        let (header, payload) = crate::util::split_first_char(&completed)?;
        let sender = self.peer_snapshot().await;
        Some(Message::received(sender, header, payload.to_vec()))
    }

    /// Inbound sub-message arrived on the DATA stream. Binary data carries
    /// no header byte, so the reassembled payload is returned as-is.
    pub async fn on_data_sub_message(self: &Arc<Self>, sub: SubMessage) -> Option<Vec<u8>> {
        self.reassemble_and_ack(StreamKind::Data, sub).await
    }

    async fn reassemble_and_ack(&self, stream: StreamKind, sub: SubMessage) -> Option<Vec<u8>> {
        let (completed, should_ack) = {
            let mut inner = self.inner.lock().await;
            let Some(state) = inner.streams.get_mut(&stream) else { return None };
            reassemble(state, sub.clone())
        };

        if should_ack {
            let ack_payload = {
                let mut buf = sub.message_id.to_bytes().as_ref().to_vec();
                buf.extend_from_slice(sub.sub_sequence.to_bytes().as_ref());
                buf
            };
            let _ = self.write_or_notify(stream.ack_characteristic(), &ack_payload).await;
        }

        completed
    }

    // ---------------------------------------------------------------
    // Disconnection
    // ---------------------------------------------------------------

    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        let was_reconnecting = {
            let mut inner = self.inner.lock().await;
            if inner.peer.reconnecting {
                inner.reconnection_timer = None;
                inner.peer.reconnecting = false;
                true
            } else {
                inner.peer.disconnecting = true;
                false
            }
        };

        if was_reconnecting {
            let peer = self.peer_snapshot().await;
            let peers_left = self.peers_left().await;
            self.callbacks.fire_disconnected(peer, peers_left);
            self.destroyed.notify_waiters();
            return Ok(());
        }

        let disconnect_characteristic = match self.role {
            Role::Central => Characteristic::DisconnectionReceive,
            Role::Peripheral => Characteristic::DisconnectionSend,
        };
        let _ = self.write_or_notify(disconnect_characteristic, &[0x01]).await;
        let _ = tokio::time::timeout(self.config.disconnect_ack_timeout, self.disconnect_ack.notified()).await;

        let device = self.require_device().await?;
        let result = match &self.host {
            HostHandle::Central(host) => host.disconnect(&device).await,
            HostHandle::Peripheral(host) => host.disconnect(&device).await,
        };
        if let Err(err) = result {
            warn!(error = %err, "OS-level disconnect primitive failed");
            let peer = self.peer_snapshot().await;
            self.callbacks.fire_disconnection_failed(peer);
        }
        Ok(())
    }

    /// Passive side: inbound write/notify hit the DISCONNECTION characteristic.
    pub async fn on_disconnection_requested(self: &Arc<Self>) -> Result<()> {
        self.disconnect().await
    }

    /// The OS confirmed `STATE_DISCONNECTED`.
    pub async fn on_hardware_disconnected(self: &Arc<Self>) {
        let was_deliberate = {
            let mut inner = self.inner.lock().await;
            let deliberate = inner.peer.disconnecting;
            inner.peer.hardware_connected = false;
            if deliberate {
                inner.peer.connected = false;
            }
            deliberate
        };

        if was_deliberate {
            let peer = self.peer_snapshot().await;
            let peers_left = self.peers_left().await;
            self.callbacks.fire_disconnected(peer, peers_left);
            self.destroyed.notify_waiters();
        } else {
            self.begin_reconnecting().await;
        }
    }

    // ---------------------------------------------------------------
    // Reconnection
    // ---------------------------------------------------------------

    async fn begin_reconnecting(self: &Arc<Self>) {
        let peer = {
            let mut inner = self.inner.lock().await;
            inner.peer.hardware_connected = false;
            inner.peer.connected = false;
            inner.peer.reconnecting = true;
            inner.state = State::Reconnecting;
            let c = self.clone();
            let timeout = self.config.reconnection_timeout;
            inner.reconnection_timer = Some(Timer::start(timeout, move || {
                let c = c.clone();
                tokio::spawn(async move { c.reconnection_timed_out().await });
            }));
            inner.peer.clone()
        };
        self.callbacks.fire_connection_lost(peer);
    }

    async fn reconnection_timed_out(self: Arc<Self>) {
        let still_reconnecting = self.inner.lock().await.peer.reconnecting;
        if !still_reconnecting {
            return;
        }
        let peer = self.peer_snapshot().await;
        warn!(peer = %peer.unique_name(), "reconnection window elapsed");
        {
            let mut inner = self.inner.lock().await;
            inner.peer.reconnecting = false;
            inner.state = State::Disconnecting;
        }
        let peers_left = self.peers_left().await;
        self.callbacks.fire_disconnected(peer, peers_left);
        self.destroyed.notify_waiters();
    }

    /// CENTRAL rediscovered a peer matching this channel's `unique_name`
    /// while it was reconnecting. Marks the reconnect attempt as in flight;
    /// the caller (`Connection`) still drives the actual `connect()` call.
    pub async fn begin_requesting_reconnection(self: &Arc<Self>, new_handle: DeviceHandle) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.peer.reconnecting || inner.peer.requesting_reconnection {
            return false;
        }
        inner.peer.set_device_handle(new_handle);
        inner.peer.requesting_reconnection = true;
        inner.state = State::Handshaking;
        true
    }

    /// Reconnection handshake completed successfully.
    async fn on_reconnected(self: &Arc<Self>) {
        let peer = {
            let mut inner = self.inner.lock().await;
            inner.peer.hardware_connected = true;
            inner.peer.connected = true;
            inner.peer.reconnecting = false;
            inner.peer.requesting_reconnection = false;
            inner.state = State::Connected;
            inner.reconnection_timer = None;
            inner.peer.clone()
        };
        info!(peer = %peer.unique_name(), "connection resumed after reconnect");
        self.resumed.notify_waiters();
        self.callbacks.fire_connection_resumed(peer);
    }

    // ---------------------------------------------------------------
    // Name propagation
    // ---------------------------------------------------------------

    pub async fn push_name_update(&self, new_unique_name: &str) -> Result<()> {
        let characteristic = match self.role {
            Role::Central => Characteristic::NameUpdateReceive,
            Role::Peripheral => Characteristic::NameUpdateSend,
        };
        self.write_or_notify(characteristic, new_unique_name.as_bytes()).await
    }

    pub async fn on_name_update(&self, new_unique_name: String) -> (Peer, Peer) {
        let mut inner = self.inner.lock().await;
        let old = inner.peer.clone();
        inner.peer.set_unique_name(new_unique_name);
        (old, inner.peer.clone())
    }

    // ---------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------

    fn central_host(&self) -> Arc<dyn CentralHost> {
        match &self.host {
            HostHandle::Central(h) => h.clone(),
            HostHandle::Peripheral(_) => unreachable!("central_host called on a PERIPHERAL channel"),
        }
    }

    fn peripheral_host(&self) -> Arc<dyn PeripheralHost> {
        match &self.host {
            HostHandle::Peripheral(h) => h.clone(),
            HostHandle::Central(_) => unreachable!("peripheral_host called on a CENTRAL channel"),
        }
    }

    async fn require_device(&self) -> Result<DeviceHandle> {
        self.inner
            .lock()
            .await
            .peer
            .device_handle()
            .cloned()
            .ok_or_else(|| Error::PeerNotFound { peer: "no device_handle yet".into() })
    }

    async fn local_unique_name(&self) -> String {
        self.local_name.lock().await.clone()
    }

    /// Count of peers still connected on this channel's owning `Connection`,
    /// for the `on_disconnected(peer, peers_left)` callback. A `Channel` has
    /// no visibility into its siblings on its own, hence the back-reference.
    async fn peers_left(&self) -> usize {
        match self.connection.upgrade() {
            Some(connection) => connection.get_connected_peers().await.len(),
            None => 0,
        }
    }

    /// The radio is being disabled out from under every channel. Attempts
    /// the same disconnect handshake `disconnect()` runs (best-effort, since
    /// the remote side may never ack it), then unconditionally fires
    /// `on_disconnected` and stops the channel's background tasks — the
    /// radio going away cascades STATE_DISCONNECTED regardless of whether
    /// the peer confirmed it.
    pub async fn destroy(self: &Arc<Self>) {
        let (should_disconnect, peer) = {
            let mut inner = self.inner.lock().await;
            let was_connected = inner.state == State::Connected;
            inner.peer.reconnecting = false;
            inner.peer.disconnecting = true;
            inner.peer.connected = false;
            (was_connected, inner.peer.clone())
        };

        if should_disconnect {
            let disconnect_characteristic = match self.role {
                Role::Central => Characteristic::DisconnectionReceive,
                Role::Peripheral => Characteristic::DisconnectionSend,
            };
            let _ = self.write_or_notify(disconnect_characteristic, &[0x01]).await;
            let _ = tokio::time::timeout(self.config.disconnect_ack_timeout, self.disconnect_ack.notified()).await;
            if let Ok(device) = self.require_device().await {
                let result = match &self.host {
                    HostHandle::Central(host) => host.disconnect(&device).await,
                    HostHandle::Peripheral(host) => host.disconnect(&device).await,
                };
                if let Err(err) = result {
                    warn!(error = %err, "OS-level disconnect primitive failed during destroy");
                }
            }
        }

        let peers_left = self.peers_left().await;
        self.callbacks.fire_disconnected(peer, peers_left);
        self.destroyed.notify_waiters();
    }
}

/// Dedup-and-reassemble for one inbound sub-message, isolated as a pure
/// function over one stream's state for easy testing independent of any
/// host/channel plumbing. Returns the full reassembled payload (header byte
/// still attached, for the text stream) on completion, and whether an ack
/// should be emitted.
fn reassemble(state: &mut StreamState, sub: SubMessage) -> (Option<Vec<u8>>, bool) {
    if state.recently_delivered.contains(&sub.message_id) {
        return (None, true);
    }

    match state.receiving.get_mut(&sub.message_id) {
        None => {
            state.receiving.insert(
                sub.message_id,
                PartialMessage { payload: sub.payload.to_vec(), last_sub_seq: sub.sub_sequence },
            );
        }
        Some(partial) => {
            if sub.sub_sequence == partial.last_sub_seq.plus(1) {
                partial.payload.extend_from_slice(&sub.payload);
                partial.last_sub_seq = sub.sub_sequence;
            } else if sub.sub_sequence <= partial.last_sub_seq {
                return (None, true);
            } else {
                return (None, false);
            }
        }
    }

    if sub.kind == SubMessageType::Final {
        if let Some(partial) = state.receiving.remove(&sub.message_id) {
            state.mark_delivered(sub.message_id);
            return (Some(partial.payload), true);
        }
    }

    (None, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(message_id: u64, sub_sequence: u64, kind: SubMessageType, payload: &[u8]) -> SubMessage {
        SubMessage::new(
            SequenceNumber::from_value(4, message_id),
            SequenceNumber::from_value(3, sub_sequence),
            kind,
            payload.to_vec(),
        )
    }

    #[test]
    fn reassembles_three_chunk_message() {
        let mut state = StreamState::new(8);
        let header_and_hi = b"ahi";
        let (a, b, c) = (&header_and_hi[0..1], &header_and_hi[1..2], &header_and_hi[2..3]);

        let (first, ack1) = reassemble(&mut state, sub(0, 0, SubMessageType::NonFinal, a));
        assert!(first.is_none() && ack1);
        let (second, ack2) = reassemble(&mut state, sub(0, 1, SubMessageType::NonFinal, b));
        assert!(second.is_none() && ack2);
        let (third, ack3) = reassemble(&mut state, sub(0, 2, SubMessageType::Final, c));
        assert!(ack3);
        let full = third.unwrap();
        let (header, payload) = crate::util::split_first_char(&full).unwrap();
        assert_eq!(header, 'a');
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn duplicate_retransmit_is_dropped_but_acked() {
        let mut state = StreamState::new(8);
        let _ = reassemble(&mut state, sub(0, 0, SubMessageType::NonFinal, b"a"));
        let _ = reassemble(&mut state, sub(0, 1, SubMessageType::Final, b"b"));
        // retransmit of already-delivered message_id
        let (completed, should_ack) = reassemble(&mut state, sub(0, 1, SubMessageType::Final, b"b"));
        assert!(completed.is_none());
        assert!(should_ack);
    }

    #[test]
    fn gap_is_dropped_without_ack() {
        let mut state = StreamState::new(8);
        let _ = reassemble(&mut state, sub(0, 0, SubMessageType::NonFinal, b"a"));
        let (completed, should_ack) = reassemble(&mut state, sub(0, 2, SubMessageType::Final, b"c"));
        assert!(completed.is_none());
        assert!(!should_ack);
    }
}
