//! The per-role ordered set of `Channel`s, plus the CENTRAL-only outbound
//! connect queue.
//!
//! One mutex-guarded collection keyed by peer identity, snapshotted before
//! any iteration so sends and disconnects never hold the collection lock
//! across an await into a `Channel`/host call.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::channel::{Channel, Role, State};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::{CentralHost, DeviceHandle, PeripheralHost};
use crate::message::Message;
use crate::peer::Peer;

enum HostHandle {
    Central(Arc<dyn CentralHost>),
    Peripheral(Arc<dyn PeripheralHost>),
}

/// One pending outbound connect attempt (normal or reconnect), queued so
/// only one connect attempt is ever in flight for a given role at a time.
struct PendingConnect {
    device: DeviceHandle,
    peer: Peer,
}

struct Inner {
    channels: Vec<Arc<Channel>>,
    pending_connections: VecDeque<PendingConnect>,
    connecting: bool,
}

/// Owns every live `Channel` for one BLE role (CENTRAL or PERIPHERAL).
pub struct Connection {
    role: Role,
    host: HostHandle,
    config: Config,
    callbacks: Arc<Callbacks>,
    local_name: Mutex<String>,
    inner: Mutex<Inner>,
}

impl Connection {
    pub fn new_central(
        host: Arc<dyn CentralHost>,
        config: Config,
        callbacks: Arc<Callbacks>,
        local_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            role: Role::Central,
            host: HostHandle::Central(host),
            config,
            callbacks,
            local_name: Mutex::new(local_name.into()),
            inner: Mutex::new(Inner { channels: Vec::new(), pending_connections: VecDeque::new(), connecting: false }),
        })
    }

    pub fn new_peripheral(
        host: Arc<dyn PeripheralHost>,
        config: Config,
        callbacks: Arc<Callbacks>,
        local_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            role: Role::Peripheral,
            host: HostHandle::Peripheral(host),
            config,
            callbacks,
            local_name: Mutex::new(local_name.into()),
            inner: Mutex::new(Inner { channels: Vec::new(), pending_connections: VecDeque::new(), connecting: false }),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn central_host_ref(&self) -> Arc<dyn CentralHost> {
        match &self.host {
            HostHandle::Central(h) => h.clone(),
            HostHandle::Peripheral(_) => unreachable!("central_host_ref on a PERIPHERAL connection"),
        }
    }

    pub fn peripheral_host_ref(&self) -> Arc<dyn PeripheralHost> {
        match &self.host {
            HostHandle::Peripheral(h) => h.clone(),
            HostHandle::Central(_) => unreachable!("peripheral_host_ref on a CENTRAL connection"),
        }
    }

    /// PERIPHERAL: attach a channel for an inbound link-up, with only a
    /// `device_handle` known so far.
    pub async fn attach_peripheral_channel(self: &Arc<Self>, device_handle: DeviceHandle) -> Arc<Channel> {
        let host = match &self.host {
            HostHandle::Peripheral(h) => h.clone(),
            HostHandle::Central(_) => unreachable!("attach_peripheral_channel on a CENTRAL connection"),
        };
        let local_name = self.local_name.lock().await.clone();
        let channel = Channel::new_peripheral(
            host,
            Arc::downgrade(self),
            device_handle,
            self.config.clone(),
            self.callbacks.clone(),
            local_name,
        );
        self.inner.lock().await.channels.push(channel.clone());
        channel
    }

    /// CENTRAL: queue an outbound connect to `device`/`peer`. If no connect
    /// is currently in progress, starts it immediately; otherwise it waits
    /// in `pending_connections`.
    pub async fn request_connect(self: &Arc<Self>, device: DeviceHandle, peer: Peer) {
        let start_now = {
            let mut inner = self.inner.lock().await;
            inner.pending_connections.push_back(PendingConnect { device, peer });
            if inner.connecting {
                false
            } else {
                inner.connecting = true;
                true
            }
        };
        if start_now {
            self.drive_next_connect().await;
        }
    }

    async fn drive_next_connect(self: &Arc<Self>) {
        let next = { self.inner.lock().await.pending_connections.pop_front() };
        let Some(pending) = next else {
            self.inner.lock().await.connecting = false;
            return;
        };

        let host = match &self.host {
            HostHandle::Central(h) => h.clone(),
            HostHandle::Peripheral(_) => unreachable!("request_connect on a PERIPHERAL connection"),
        };

        if let Err(err) = host.connect(&pending.device).await {
            warn!(peer = %pending.peer.unique_name(), error = %err, "outbound connect failed");
            self.callbacks.fire_connection_failed(pending.peer, err);
            self.continue_connect_queue().await;
            return;
        }

        let local_name = self.local_name.lock().await.clone();
        let channel = Channel::new_central(
            host,
            Arc::downgrade(self),
            pending.peer,
            self.config.clone(),
            self.callbacks.clone(),
            local_name,
        );
        self.inner.lock().await.channels.push(channel);
    }

    /// Called once a CENTRAL channel's handshake resolves (success, reject,
    /// or timeout) so the next queued connect attempt can start.
    pub async fn continue_connect_queue(self: &Arc<Self>) {
        self.drive_next_connect().await;
    }

    /// The same FIFO is reused for reconnection attempts.
    pub async fn request_reconnect(self: &Arc<Self>, device: DeviceHandle, peer: Peer) {
        self.request_connect(device, peer).await;
    }

    async fn channels_snapshot(&self) -> Vec<Arc<Channel>> {
        self.inner.lock().await.channels.clone()
    }

    async fn matching_channels(&self, receiver: &Option<Peer>) -> Vec<Arc<Channel>> {
        let snapshot = self.channels_snapshot().await;
        let Some(receiver) = receiver else { return snapshot };
        let mut matched = Vec::new();
        for channel in snapshot {
            let peer = channel.peer_snapshot().await;
            if peer.identity_eq(receiver) {
                matched.push(channel);
            }
        }
        matched
    }

    /// Snapshot, filter by receiver if set, then send strictly sequentially
    /// across the matched channels, skipping any mid-teardown.
    pub async fn send_message(self: &Arc<Self>, message: &Message) -> Result<()> {
        let targets = self.matching_channels(&message.receiver).await;
        for channel in targets {
            if channel.peer_snapshot().await.disconnecting {
                continue;
            }
            channel.send_message(message).await?;
        }
        Ok(())
    }

    pub async fn send_data(self: &Arc<Self>, receiver: Option<Peer>, payload: &[u8]) -> Result<()> {
        let targets = self.matching_channels(&receiver).await;
        for channel in targets {
            if channel.peer_snapshot().await.disconnecting {
                continue;
            }
            channel.send_data(payload).await?;
        }
        Ok(())
    }

    /// Find the channel whose peer currently owns `device`. Used to route
    /// host events, which only ever carry a `DeviceHandle`.
    pub async fn channel_by_device(&self, device: &DeviceHandle) -> Option<Arc<Channel>> {
        let snapshot = self.channels_snapshot().await;
        for channel in snapshot {
            if channel.peer_snapshot().await.device_handle() == Some(device) {
                return Some(channel);
            }
        }
        None
    }

    /// Find the channel whose peer identity matches `peer` (device-handle
    /// equality first, falling back to `unique_name`).
    pub async fn channel_for(&self, peer: &Peer) -> Option<Arc<Channel>> {
        let snapshot = self.channels_snapshot().await;
        for channel in snapshot {
            if channel.peer_snapshot().await.identity_eq(peer) {
                return Some(channel);
            }
        }
        None
    }

    pub async fn disconnect(self: &Arc<Self>, peer: &Peer) -> Result<()> {
        let channel = self
            .channel_for(peer)
            .await
            .ok_or_else(|| Error::PeerNotFound { peer: peer.unique_name().to_string() })?;
        channel.disconnect().await
    }

    /// Sequential, not parallel, so the channel set isn't mutated mid-loop.
    pub async fn disconnect_all(self: &Arc<Self>) {
        let snapshot = self.channels_snapshot().await;
        for channel in snapshot {
            if let Err(err) = channel.disconnect().await {
                debug!(error = %err, "disconnect_all: one channel failed to tear down");
            }
        }
    }

    /// Find a channel that is reconnecting and whose peer's `unique_name`
    /// matches a scan result, so the caller can kick off a reconnect
    /// attempt against it.
    pub async fn reconnecting_channel_for_name(&self, unique_name: &str) -> Option<Arc<Channel>> {
        let snapshot = self.channels_snapshot().await;
        for channel in snapshot {
            let peer = channel.peer_snapshot().await;
            if peer.reconnecting && !peer.requesting_reconnection && peer.unique_name() == unique_name {
                return Some(channel);
            }
        }
        None
    }

    pub async fn get_connected_peers(&self) -> Vec<Peer> {
        let snapshot = self.channels_snapshot().await;
        let mut peers = Vec::with_capacity(snapshot.len());
        for channel in snapshot {
            let peer = channel.peer_snapshot().await;
            if peer.connected {
                peers.push(peer);
            }
        }
        peers
    }

    pub async fn get_reconnecting_peers(&self) -> Vec<Peer> {
        let snapshot = self.channels_snapshot().await;
        let mut peers = Vec::with_capacity(snapshot.len());
        for channel in snapshot {
            let peer = channel.peer_snapshot().await;
            if peer.reconnecting {
                peers.push(peer);
            }
        }
        peers
    }

    /// PERIPHERAL: push a new advertised name to every live channel.
    /// CENTRAL: push the identity update over each channel's name-update
    /// characteristic.
    pub async fn update_name(&self, new_unique_name: &str) -> Result<()> {
        *self.local_name.lock().await = new_unique_name.to_string();
        let snapshot = self.channels_snapshot().await;
        for channel in snapshot {
            channel.set_local_name(new_unique_name).await;
            channel.push_name_update(new_unique_name).await?;
        }
        Ok(())
    }

    /// Removes channels that reported their teardown via `destroy()`. The
    /// `Communicator` calls this after each disconnect/failure callback;
    /// stale entries are harmless until then since every public operation
    /// re-snapshots first.
    pub async fn prune_destroyed(&self) {
        let mut inner = self.inner.lock().await;
        let mut kept = Vec::with_capacity(inner.channels.len());
        for channel in inner.channels.drain(..) {
            let state = channel.state().await;
            if state != State::Disconnecting || channel.peer_snapshot().await.reconnecting {
                kept.push(channel);
            } else {
                info!(peer = %channel.peer_snapshot().await.unique_name(), "channel destroyed and pruned");
            }
        }
        inner.channels = kept;
    }

    pub async fn destroy(self: &Arc<Self>) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.pending_connections.clear();
            inner.connecting = false;
            std::mem::take(&mut inner.channels)
        };
        for channel in snapshot {
            channel.destroy().await;
        }
    }
}
