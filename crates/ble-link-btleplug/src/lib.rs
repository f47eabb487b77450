//! Real-hardware `CentralHost`/`PeripheralHost` pair for `ble-link-core`.
//!
//! `btleplug` backs the central role on every desktop platform it supports.
//! The peripheral role (advertiser + local GATT server) has no portable
//! crate, so [`peripheral::new_platform_peripheral_host`] dispatches to a
//! platform-specific backend — `bluer` on Linux, a
//! [`peripheral::fallback::FallbackPeripheralHost`] everywhere else that
//! reports [`ble_link_core::error::Error::BluetoothLeNotSupported`] rather
//! than silently doing nothing.

pub mod central;
pub mod peripheral;
mod uuids;

pub use central::BtleplugCentralHost;
pub use peripheral::new_platform_peripheral_host;
pub use uuids::SERVICE_UUID;
