//! Wiring between the real-hardware host adapters and the protocol core

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, OnceCell};
use tracing::{info, warn};

use ble_link_core::{Callbacks, Communicator, Config, Error, Message, Peer};
use ble_link_btleplug::{new_platform_peripheral_host, BtleplugCentralHost};

use crate::error::{CliError, Result};

type ConnectWaiters = Mutex<HashMap<String, oneshot::Sender<std::result::Result<(), String>>>>;

/// Discovered-peer registry plus the pending-connect waiter table, both
/// populated from `Callbacks` fired by `Communicator`. `self_ref` lets the
/// `on_connection_request` hook answer inbound requests, despite the
/// `Communicator` not existing yet at the point `Callbacks` is built.
struct Registry {
    discovered: Mutex<HashMap<String, Peer>>,
    connect_waiters: ConnectWaiters,
    self_ref: OnceCell<Arc<Communicator>>,
    auto_accept: bool,
}

/// Owns the running `Communicator` and the two event-pump tasks feeding it
/// from the real BLE hosts.
pub struct BleLinkApp {
    pub communicator: Arc<Communicator>,
    registry: Arc<Registry>,
}

impl BleLinkApp {
    pub async fn new(unique_name: impl Into<String>, config: Config, auto_accept: bool) -> Result<Self> {
        let (central_host, mut central_rx) = BtleplugCentralHost::new()
            .await
            .map_err(map_startup_error)?;
        let (peripheral_host, mut peripheral_rx) = new_platform_peripheral_host()
            .await
            .map_err(map_startup_error)?;

        let registry = Arc::new(Registry {
            discovered: Mutex::new(HashMap::new()),
            connect_waiters: Mutex::new(HashMap::new()),
            self_ref: OnceCell::new(),
            auto_accept,
        });

        let callbacks = build_callbacks(registry.clone());
        let communicator =
            Communicator::new(central_host, peripheral_host, unique_name, config, callbacks);
        let _ = registry.self_ref.set(communicator.clone());

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

        Ok(Self { communicator, registry })
    }

    pub async fn discovered_peers(&self) -> Vec<Peer> {
        self.registry.discovered.lock().await.values().cloned().collect()
    }

    /// Connect to a previously-discovered peer and wait for the handshake to
    /// settle (accepted, rejected, or timed out).
    pub async fn connect_and_wait(&self, unique_name: &str) -> Result<()> {
        let device = {
            let discovered = self.registry.discovered.lock().await;
            discovered
                .get(unique_name)
                .and_then(|peer| peer.device_handle().cloned())
                .ok_or_else(|| CliError::PeerNotDiscovered(unique_name.to_string()))?
        };

        let (tx, rx) = oneshot::channel();
        self.registry
            .connect_waiters
            .lock()
            .await
            .insert(unique_name.to_string(), tx);

        self.communicator.connect(device, unique_name).await;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(CliError::ConnectFailed { peer: unique_name.to_string(), reason }),
            Err(_) => Err(CliError::ConnectFailed {
                peer: unique_name.to_string(),
                reason: "connection outcome never arrived".to_string(),
            }),
        }
    }

    pub async fn send_text(&self, to: Option<Peer>, text: &str) -> Result<()> {
        let message = Message::new("m", text.as_bytes().to_vec()).map_err(CliError::Link)?;
        let message = match to {
            Some(peer) => message.with_receiver(peer),
            None => message,
        };
        self.communicator.send_message(message).await.map_err(CliError::Link)
    }
}

fn map_startup_error(err: Error) -> CliError {
    match err {
        Error::BluetoothLeNotSupported => CliError::BluetoothLeNotSupported,
        other => CliError::Link(other),
    }
}

fn build_callbacks(registry: Arc<Registry>) -> Callbacks {
    let found_registry = registry.clone();
    let updated_registry = registry.clone();
    let request_registry = registry.clone();
    let success_registry = registry.clone();
    let failed_registry = registry.clone();

    Callbacks::new()
        .with_on_peer_found(move |peer| {
            info!(peer = peer.unique_name(), "peer discovered");
            let registry = found_registry.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                registry.discovered.lock().await.insert(peer.unique_name().to_string(), peer);
            });
        })
        .with_on_peer_updated(move |_old, new| {
            let registry = updated_registry.clone();
            let new = new.clone();
            tokio::spawn(async move {
                registry.discovered.lock().await.insert(new.unique_name().to_string(), new);
            });
        })
        .with_on_connection_request(move |peer| {
            info!(peer = peer.unique_name(), "inbound connection request");
            let registry = request_registry.clone();
            tokio::spawn(async move {
                let Some(communicator) = registry.self_ref.get() else { return };
                if registry.auto_accept {
                    communicator.accept_connection(&peer).await;
                } else {
                    communicator.reject_connection(&peer).await;
                }
            });
        })
        .with_on_connection_success(move |peer, role| {
            info!(peer = peer.unique_name(), role = ?role, "connection established");
            let registry = success_registry.clone();
            let name = peer.unique_name().to_string();
            tokio::spawn(async move {
                if let Some(waiter) = registry.connect_waiters.lock().await.remove(&name) {
                    let _ = waiter.send(Ok(()));
                }
            });
        })
        .with_on_connection_failed(move |peer, err| {
            warn!(peer = peer.unique_name(), error = %err, "connection failed");
            let registry = failed_registry.clone();
            let name = peer.unique_name().to_string();
            let reason = err.to_string();
            tokio::spawn(async move {
                if let Some(waiter) = registry.connect_waiters.lock().await.remove(&name) {
                    let _ = waiter.send(Err(reason));
                }
            });
        })
        .with_on_connection_lost(move |peer| {
            warn!(peer = peer.unique_name(), "connection lost, reconnect window open");
        })
        .with_on_connection_resumed(move |peer| {
            info!(peer = peer.unique_name(), "connection resumed");
        })
        .with_on_message_received(move |message, role| {
            if let Some(sender) = &message.sender {
                info!(
                    from = sender.unique_name(),
                    role = ?role,
                    text = %String::from_utf8_lossy(&message.payload),
                    "message received"
                );
            }
        })
        .with_on_data_received(move |data, role| {
            info!(from = data.sender.unique_name(), role = ?role, bytes = data.payload.len(), "binary data received");
        })
        .with_on_disconnected(move |peer, peers_left| {
            info!(peer = peer.unique_name(), peers_left, "disconnected");
        })
        .with_on_disconnection_failed(move |peer| {
            warn!(peer = peer.unique_name(), "disconnect did not complete");
        })
}

/// Wait for Ctrl-C, or for `seconds` to elapse if given.
pub async fn wait_for_interrupt_or_timeout(seconds: Option<u64>) {
    match seconds {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
