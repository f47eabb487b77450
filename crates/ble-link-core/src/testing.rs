//! In-memory `CentralHost`/`PeripheralHost` pair for exercising the protocol
//! state machines without a real Bluetooth radio.
//!
//! A shared piece of in-memory state stands in for the physical medium, and
//! writes/notifies are turned back into `HostEvent`s on the other side's
//! channel instead of actually going over the air. Fault injection is
//! one-shot and explicit (`drop_next_write` / `drop_next_notify`) so
//! scenarios like an ack getting lost and triggering a retransmit, or an
//! unwanted disconnect, are deterministic to set up in a test.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::config::TARGET_LINK_MTU;
use crate::error::{Error, Result};
use crate::host::{CentralHost, Characteristic, DeviceHandle, HostEvent, PeripheralHost};

struct AirState {
    connected: bool,
    mtu: usize,
    advertised_name: Option<String>,
    drop_c2p: HashSet<Characteristic>,
    drop_p2c: HashSet<Characteristic>,
}

/// The simulated medium between one CENTRAL and one PERIPHERAL `FakeHost`,
/// created by [`link`].
struct Air {
    central_addr: String,
    peripheral_addr: String,
    state: Mutex<AirState>,
    central_tx: mpsc::UnboundedSender<HostEvent>,
    peripheral_tx: mpsc::UnboundedSender<HostEvent>,
}

/// A `CentralHost` that can be linked to any number of `FakePeripheralHost`s
/// via [`link`], one `Air` per peripheral.
pub struct FakeCentralHost {
    addr: String,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    airs: Mutex<HashMap<String, Arc<Air>>>,
}

/// A `PeripheralHost` linked to exactly one central via [`link`], matching
/// how a real peripheral only ever has one active central connection.
pub struct FakePeripheralHost {
    addr: String,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    air: Mutex<Option<Arc<Air>>>,
}

impl FakeCentralHost {
    pub fn new(addr: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self { addr: addr.into(), events_tx: tx, airs: Mutex::new(HashMap::new()) });
        (host, rx)
    }

    async fn air_for(&self, device: &DeviceHandle) -> Result<Arc<Air>> {
        self.airs
            .lock()
            .await
            .get(device.address())
            .cloned()
            .ok_or_else(|| Error::PeerNotFound { peer: device.address().to_string() })
    }

    /// Schedule the next write to `characteristic` against `peripheral_addr`
    /// to be accepted locally (still `WriteAcked`) but never delivered to
    /// the peripheral, simulating an application-level ack loss.
    pub async fn drop_next_write(&self, peripheral_addr: &str, characteristic: Characteristic) {
        if let Some(air) = self.airs.lock().await.get(peripheral_addr) {
            air.state.lock().await.drop_c2p.insert(characteristic);
        }
    }
}

impl FakePeripheralHost {
    pub fn new(addr: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self { addr: addr.into(), events_tx: tx, air: Mutex::new(None) });
        (host, rx)
    }

    async fn air(&self) -> Result<Arc<Air>> {
        self.air.lock().await.clone().ok_or_else(|| Error::Host("not linked to a central".into()))
    }

    /// Schedule the next notify on `characteristic` to be accepted locally
    /// but never delivered to the central.
    pub async fn drop_next_notify(&self, characteristic: Characteristic) {
        if let Some(air) = self.air.lock().await.as_ref() {
            air.state.lock().await.drop_p2c.insert(characteristic);
        }
    }
}

/// Pair a central and a peripheral so the peripheral becomes dialable (and,
/// once advertising, discoverable) by that central. Call once per pair
/// before `start_scan`/`connect`; call again with a different peripheral to
/// give one central several simulated peers.
pub async fn link(central: &Arc<FakeCentralHost>, peripheral: &Arc<FakePeripheralHost>) {
    let air = Arc::new(Air {
        central_addr: central.addr.clone(),
        peripheral_addr: peripheral.addr.clone(),
        state: Mutex::new(AirState {
            connected: false,
            mtu: TARGET_LINK_MTU,
            advertised_name: None,
            drop_c2p: HashSet::new(),
            drop_p2c: HashSet::new(),
        }),
        central_tx: central.events_tx.clone(),
        peripheral_tx: peripheral.events_tx.clone(),
    });
    central.airs.lock().await.insert(peripheral.addr.clone(), air.clone());
    *peripheral.air.lock().await = Some(air);
}

#[async_trait]
impl CentralHost for FakeCentralHost {
    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let air = self.air_for(device).await?;
        air.state.lock().await.connected = true;
        let _ = air.central_tx.send(HostEvent::LinkUp { device: device.clone() });
        let _ = air.peripheral_tx.send(HostEvent::LinkUp { device: DeviceHandle::new(air.central_addr.clone()) });
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<()> {
        let air = self.air_for(device).await?;
        air.state.lock().await.connected = false;
        let _ = air.central_tx.send(HostEvent::DisconnectConfirmed { device: device.clone() });
        let _ = air.peripheral_tx.send(HostEvent::LinkDown { device: DeviceHandle::new(air.central_addr.clone()) });
        Ok(())
    }

    async fn request_mtu(&self, device: &DeviceHandle, mtu: usize) -> Result<()> {
        let air = self.air_for(device).await?;
        air.state.lock().await.mtu = mtu;
        let _ = air.central_tx.send(HostEvent::MtuChanged { device: device.clone(), mtu });
        let _ = air.peripheral_tx.send(HostEvent::MtuChanged { device: DeviceHandle::new(air.central_addr.clone()), mtu });
        Ok(())
    }

    async fn subscribe(&self, device: &DeviceHandle, _characteristic: Characteristic) -> Result<()> {
        self.air_for(device).await.map(|_| ())
    }

    async fn write(&self, device: &DeviceHandle, characteristic: Characteristic, data: &[u8]) -> Result<()> {
        let air = self.air_for(device).await?;
        let dropped = air.state.lock().await.drop_c2p.remove(&characteristic);
        if !dropped {
            let _ = air.peripheral_tx.send(HostEvent::ValueReceived {
                device: DeviceHandle::new(air.central_addr.clone()),
                characteristic,
                data: data.to_vec(),
            });
        }
        let _ = air.central_tx.send(HostEvent::WriteAcked { device: device.clone(), characteristic });
        Ok(())
    }

    async fn start_scan(&self) -> Result<()> {
        for air in self.airs.lock().await.values() {
            let state = air.state.lock().await;
            if let Some(name) = state.advertised_name.clone() {
                let _ = air.central_tx.send(HostEvent::ScanResult {
                    device: DeviceHandle::new(air.peripheral_addr.clone()),
                    unique_name: Some(name),
                });
            }
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PeripheralHost for FakePeripheralHost {
    async fn notify(&self, device: &DeviceHandle, characteristic: Characteristic, data: &[u8]) -> Result<()> {
        let air = self.air().await?;
        let dropped = air.state.lock().await.drop_p2c.remove(&characteristic);
        if !dropped {
            let _ = air.central_tx.send(HostEvent::ValueReceived {
                device: DeviceHandle::new(air.peripheral_addr.clone()),
                characteristic,
                data: data.to_vec(),
            });
        }
        let _ = air.peripheral_tx.send(HostEvent::WriteAcked { device: device.clone(), characteristic });
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<()> {
        let air = self.air().await?;
        air.state.lock().await.connected = false;
        let _ = air.peripheral_tx.send(HostEvent::DisconnectConfirmed { device: device.clone() });
        let _ = air.central_tx.send(HostEvent::LinkDown { device: DeviceHandle::new(air.peripheral_addr.clone()) });
        Ok(())
    }

    async fn start_advertising(&self, unique_name: &str) -> Result<()> {
        let air = self.air().await?;
        air.state.lock().await.advertised_name = Some(unique_name.to_string());
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        let air = self.air().await?;
        air.state.lock().await.advertised_name = None;
        Ok(())
    }

    async fn update_advertised_name(&self, unique_name: &str) -> Result<()> {
        let air = self.air().await?;
        air.state.lock().await.advertised_name = Some(unique_name.to_string());
        Ok(())
    }

    async fn current_mtu(&self, _device: &DeviceHandle) -> Result<usize> {
        let air = self.air().await?;
        Ok(air.state.lock().await.mtu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_delivers_link_up_to_both_sides() {
        let (central, mut central_events) = FakeCentralHost::new("central-1");
        let (peripheral, mut peripheral_events) = FakePeripheralHost::new("peripheral-1");
        link(&central, &peripheral).await;

        central.connect(&DeviceHandle::new("peripheral-1")).await.unwrap();

        assert!(matches!(central_events.recv().await, Some(HostEvent::LinkUp { .. })));
        assert!(matches!(peripheral_events.recv().await, Some(HostEvent::LinkUp { .. })));
    }

    #[tokio::test]
    async fn scan_finds_advertising_peripheral_by_name() {
        let (central, mut central_events) = FakeCentralHost::new("central-1");
        let (peripheral, _peripheral_events) = FakePeripheralHost::new("peripheral-1");
        link(&central, &peripheral).await;
        peripheral.start_advertising("alice#ab").await.unwrap();

        central.start_scan().await.unwrap();

        match central_events.recv().await {
            Some(HostEvent::ScanResult { device, unique_name }) => {
                assert_eq!(device.address(), "peripheral-1");
                assert_eq!(unique_name.as_deref(), Some("alice#ab"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_delivers_value_and_acks_locally() {
        let (central, mut central_events) = FakeCentralHost::new("central-1");
        let (peripheral, mut peripheral_events) = FakePeripheralHost::new("peripheral-1");
        link(&central, &peripheral).await;
        let device = DeviceHandle::new("peripheral-1");
        central.connect(&device).await.unwrap();
        central_events.recv().await;
        peripheral_events.recv().await;

        central.write(&device, Characteristic::MessageSend, b"hi").await.unwrap();

        assert!(matches!(peripheral_events.recv().await, Some(HostEvent::ValueReceived { .. })));
        assert!(matches!(central_events.recv().await, Some(HostEvent::WriteAcked { .. })));
    }

    #[tokio::test]
    async fn dropped_write_still_acks_but_never_arrives() {
        let (central, mut central_events) = FakeCentralHost::new("central-1");
        let (peripheral, mut peripheral_events) = FakePeripheralHost::new("peripheral-1");
        link(&central, &peripheral).await;
        let device = DeviceHandle::new("peripheral-1");
        central.connect(&device).await.unwrap();
        central_events.recv().await;
        peripheral_events.recv().await;

        central.drop_next_write("peripheral-1", Characteristic::MessageSend).await;
        central.write(&device, Characteristic::MessageSend, b"hi").await.unwrap();

        assert!(matches!(central_events.recv().await, Some(HostEvent::WriteAcked { .. })));
        assert!(peripheral_events.try_recv().is_err());

        // The drop is one-shot: a second write goes through.
        central.write(&device, Characteristic::MessageSend, b"hi again").await.unwrap();
        assert!(matches!(peripheral_events.recv().await, Some(HostEvent::ValueReceived { .. })));
    }

    #[tokio::test]
    async fn current_mtu_reflects_negotiated_value() {
        let (central, _central_events) = FakeCentralHost::new("central-1");
        let (peripheral, _peripheral_events) = FakePeripheralHost::new("peripheral-1");
        link(&central, &peripheral).await;
        let device = DeviceHandle::new("peripheral-1");

        assert_eq!(peripheral.current_mtu(&device).await.unwrap(), TARGET_LINK_MTU);

        central.request_mtu(&device, 128).await.unwrap();
        assert_eq!(peripheral.current_mtu(&device).await.unwrap(), 128);
    }
}
