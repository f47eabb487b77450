//! `PeripheralHost` for platforms with no peripheral-mode backend wired up
//! yet (macOS, Windows). `btleplug` itself never supports peripheral mode,
//! so every non-Linux target lands here until a platform-specific GATT
//! server backend (`core-bluetooth`, `windows`) is added.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ble_link_core::error::{Error, Result};
use ble_link_core::host::{Characteristic, DeviceHandle, HostEvent, PeripheralHost};

pub struct FallbackPeripheralHost {
    /// Kept alive so the paired receiver returned by `new()` stays open
    /// (never yielding, since this backend never emits an event) instead of
    /// immediately reporting the channel closed.
    _events_tx: mpsc::UnboundedSender<HostEvent>,
}

impl FallbackPeripheralHost {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>) {
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { _events_tx }), events_rx)
    }
}

#[async_trait]
impl PeripheralHost for FallbackPeripheralHost {
    async fn notify(&self, _device: &DeviceHandle, _characteristic: Characteristic, _data: &[u8]) -> Result<()> {
        Err(Error::BluetoothLeNotSupported)
    }

    async fn disconnect(&self, _device: &DeviceHandle) -> Result<()> {
        Err(Error::BluetoothLeNotSupported)
    }

    async fn start_advertising(&self, _unique_name: &str) -> Result<()> {
        Err(Error::BluetoothLeNotSupported)
    }

    async fn stop_advertising(&self) -> Result<()> {
        Ok(())
    }

    async fn update_advertised_name(&self, _unique_name: &str) -> Result<()> {
        Err(Error::BluetoothLeNotSupported)
    }

    async fn current_mtu(&self, _device: &DeviceHandle) -> Result<usize> {
        Err(Error::BluetoothLeNotSupported)
    }
}
