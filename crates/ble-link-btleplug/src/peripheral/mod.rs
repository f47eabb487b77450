//! Platform selection for the `PeripheralHost` backend.
//!
//! `btleplug` covers the central role on every platform, but peripheral mode
//! (advertiser + GATT server) has no portable API, so each OS needs its own
//! backend behind this one constructor.

#[cfg(target_os = "linux")]
pub mod linux;
pub mod fallback;

use std::sync::Arc;

use tokio::sync::mpsc;

use ble_link_core::error::Result;
use ble_link_core::host::{HostEvent, PeripheralHost};

/// Construct the `PeripheralHost` for the current platform and the receiver
/// the caller pumps into `Communicator::on_peripheral_event`.
pub async fn new_platform_peripheral_host() -> Result<(Arc<dyn PeripheralHost>, mpsc::UnboundedReceiver<HostEvent>)> {
    #[cfg(target_os = "linux")]
    {
        let (host, rx) = linux::BluerPeripheralHost::new().await?;
        Ok((host as Arc<dyn PeripheralHost>, rx))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let (host, rx) = fallback::FallbackPeripheralHost::new();
        Ok((host as Arc<dyn PeripheralHost>, rx))
    }
}
