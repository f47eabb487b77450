//! `CentralHost` backed by `btleplug`, the one part of this stack with a
//! single cross-platform API for the central GATT role (scan, connect,
//! characteristic write, notification subscribe).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use ble_link_core::error::{Error, Result};
use ble_link_core::host::{CentralHost, Characteristic, DeviceHandle, HostEvent};

use crate::uuids::{characteristic_for_uuid, uuid_for, SERVICE_UUID};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `CentralHost` implementation wrapping one `btleplug` adapter.
///
/// A `DeviceHandle` minted by this host always carries the live
/// `btleplug::platform::Peripheral` via `DeviceHandle::with_native`, so every
/// trait method recovers it with a plain downcast instead of keeping its own
/// address-keyed table.
pub struct BtleplugCentralHost {
    adapter: Adapter,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    known: Mutex<HashMap<PeripheralId, DeviceHandle>>,
}

impl BtleplugCentralHost {
    /// Initialize the first BLE adapter on this host and start forwarding its
    /// event stream. Returns the receiving half the caller pumps into
    /// `Communicator::on_central_event`.
    pub async fn new() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<HostEvent>)> {
        let manager = Manager::new().await.map_err(|e| Error::Host(e.to_string()))?;
        let adapters = manager.adapters().await.map_err(|e| Error::Host(e.to_string()))?;
        let adapter = adapters.into_iter().next().ok_or(Error::BluetoothLeNotSupported)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self {
            adapter,
            events_tx,
            known: Mutex::new(HashMap::new()),
        });

        let forward = host.clone();
        let mut central_events =
            forward.adapter.events().await.map_err(|e| Error::Host(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                forward.forward_central_event(event).await;
            }
        });

        Ok((host, events_rx))
    }

    fn peripheral_of(device: &DeviceHandle) -> Result<Peripheral> {
        device
            .downcast_native::<Peripheral>()
            .cloned()
            .ok_or_else(|| Error::Host(format!("no btleplug peripheral attached to {}", device.address())))
    }

    async fn forward_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.announce_discovery(id).await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(device) = self.known.lock().await.get(&id).cloned() {
                    let _ = self.events_tx.send(HostEvent::LinkDown { device });
                }
            }
            _ => {}
        }
    }

    async fn announce_discovery(&self, id: PeripheralId) {
        let Ok(peripheral) = self.adapter.peripheral(&id).await else { return };
        let Ok(Some(properties)) = peripheral.properties().await else { return };
        if !properties.services.contains(&SERVICE_UUID) {
            return;
        }
        let unique_name = properties.local_name.clone();
        let device = DeviceHandle::with_native(id.to_string(), Arc::new(peripheral));
        self.known.lock().await.insert(id, device.clone());
        let _ = self.events_tx.send(HostEvent::ScanResult { device, unique_name });
    }
}

#[async_trait]
impl CentralHost for BtleplugCentralHost {
    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let peripheral = Self::peripheral_of(device)?;
        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| Error::Host("connect timed out".into()))?
            .map_err(|e| Error::Host(e.to_string()))?;
        peripheral.discover_services().await.map_err(|e| Error::Host(e.to_string()))?;

        let forward = self.events_tx.clone();
        let device_for_task = device.clone();
        let mut notifications = peripheral.notifications().await.map_err(|e| Error::Host(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(value) = notifications.next().await {
                let Some(characteristic) = characteristic_for_uuid(value.uuid) else { continue };
                let event = HostEvent::ValueReceived {
                    device: device_for_task.clone(),
                    characteristic,
                    data: value.value,
                };
                if forward.send(event).is_err() {
                    break;
                }
            }
            debug!(peer = %device_for_task.address(), "notification stream ended");
        });

        let _ = self.events_tx.send(HostEvent::LinkUp { device: device.clone() });
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<()> {
        let peripheral = Self::peripheral_of(device)?;
        peripheral.disconnect().await.map_err(|e| Error::Host(e.to_string()))?;
        let _ = self.events_tx.send(HostEvent::DisconnectConfirmed { device: device.clone() });
        Ok(())
    }

    async fn request_mtu(&self, device: &DeviceHandle, mtu: usize) -> Result<()> {
        // btleplug has no cross-platform MTU-request call; the OS negotiates
        // it during connect. Report the requested value as a best effort so
        // the handshake state machine has something to act on.
        warn!(peer = %device.address(), mtu, "btleplug has no MTU request API, reporting requested value");
        let _ = self.events_tx.send(HostEvent::MtuChanged { device: device.clone(), mtu });
        Ok(())
    }

    async fn subscribe(&self, device: &DeviceHandle, characteristic: Characteristic) -> Result<()> {
        let peripheral = Self::peripheral_of(device)?;
        let uuid = uuid_for(characteristic);
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::Host(format!("characteristic {characteristic:?} not found")))?;
        peripheral.subscribe(&target).await.map_err(|e| Error::Host(e.to_string()))
    }

    async fn write(&self, device: &DeviceHandle, characteristic: Characteristic, data: &[u8]) -> Result<()> {
        let peripheral = Self::peripheral_of(device)?;
        let uuid = uuid_for(characteristic);
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::Host(format!("characteristic {characteristic:?} not found")))?;
        peripheral
            .write(&target, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| Error::Host(e.to_string()))?;
        let _ = self.events_tx.send(HostEvent::WriteAcked { device: device.clone(), characteristic });
        Ok(())
    }

    async fn start_scan(&self) -> Result<()> {
        let filter = ScanFilter { services: vec![SERVICE_UUID] };
        self.adapter.start_scan(filter).await.map_err(|e| Error::Host(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(|e| Error::Host(e.to_string()))
    }
}
