//! The out-of-scope OS BLE stack, modeled as a contract
//!
//! The host operating system's BLE stack (advertising, scanning, GATT
//! server/client primitives, MTU negotiation, bonding) is treated as an
//! external collaborator with only its contract specified here: two traits
//! (`CentralHost`, `PeripheralHost`) standing in for the asymmetric BLE
//! primitives — characteristic writes by the central, value notifications by
//! the peripheral — plus the event/opaque-handle types both sides need to
//! agree on. A concrete implementation (e.g. `ble-link-btleplug`) fulfills
//! this contract against real hardware; the `testing` module fulfills it in
//! memory for protocol-level tests.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// One characteristic of the single GATT service both roles agree on. Which
/// side writes versus notifies a given variant is documentation only here —
/// the trait methods that use it are what actually enforce the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    ConnectionRequest,
    ConnectionResponse,
    MtuRequest,
    MtuResponse,
    MessageReceive,
    MessageSend,
    ReadResponseMessageReceived,
    DataReceive,
    DataSend,
    ReadResponseDataReceived,
    NameUpdateReceive,
    NameUpdateSend,
    ConnectionResumedReceive,
    ConnectionResumedSend,
    DisconnectionReceive,
    DisconnectionSend,
}

/// An opaque identity for one physical link, handed out by the OS BLE stack
/// (e.g. a `btleplug::PeripheralId`, a `bluer` device path). The core never
/// interprets the contents; peer identity is address equality, which is the
/// only thing this type exposes.
#[derive(Clone)]
pub struct DeviceHandle {
    address: String,
    native: Arc<dyn Any + Send + Sync>,
}

impl DeviceHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            native: Arc::new(()),
        }
    }

    /// Attach a platform-specific handle an adapter crate wants to carry
    /// alongside the address (e.g. the live `btleplug::Peripheral`).
    pub fn with_native(address: impl Into<String>, native: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            address: address.into(),
            native,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Recover the adapter-specific payload stashed via `with_native`.
    pub fn downcast_native<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.native.downcast_ref::<T>()
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle").field("address", &self.address).finish()
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}
impl Eq for DeviceHandle {}

impl std::hash::Hash for DeviceHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Events the host pushes upward, marshalled by `Communicator` onto the
/// owning channel's state machine.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A link came up (outbound connect completed, or an inbound link
    /// attached on the peripheral side).
    LinkUp { device: DeviceHandle },
    /// A link went down without prior agreement — an unwanted disconnect.
    LinkDown { device: DeviceHandle },
    /// The OS confirmed `STATE_DISCONNECTED` following a deliberate teardown.
    DisconnectConfirmed { device: DeviceHandle },
    /// A characteristic write (central->peripheral) or notify
    /// (peripheral->central) that this side issued has completed — the
    /// link-layer ack.
    WriteAcked { device: DeviceHandle, characteristic: Characteristic },
    /// A value arrived on a characteristic this side subscribed to, or was
    /// written to this side's GATT server.
    ValueReceived { device: DeviceHandle, characteristic: Characteristic, data: Vec<u8> },
    /// The BLE MTU for a link changed following negotiation.
    MtuChanged { device: DeviceHandle, mtu: usize },
    /// A scan result matching the service UUID, carrying the advertised
    /// `unique_name` if it was present in the advertising data.
    ScanResult { device: DeviceHandle, unique_name: Option<String> },
    /// The radio itself turned on or off.
    RadioStateChanged { on: bool },
}

/// Primitives available to a CENTRAL-role `Channel`/`Connection`: it writes
/// characteristics and subscribes to notifications.
#[async_trait]
pub trait CentralHost: Send + Sync {
    async fn connect(&self, device: &DeviceHandle) -> Result<()>;
    async fn disconnect(&self, device: &DeviceHandle) -> Result<()>;
    async fn request_mtu(&self, device: &DeviceHandle, mtu: usize) -> Result<()>;
    async fn subscribe(&self, device: &DeviceHandle, characteristic: Characteristic) -> Result<()>;
    async fn write(&self, device: &DeviceHandle, characteristic: Characteristic, data: &[u8]) -> Result<()>;
    async fn start_scan(&self) -> Result<()>;
    async fn stop_scan(&self) -> Result<()>;
}

/// Primitives available to a PERIPHERAL-role `Channel`/`Connection`: it
/// notifies characteristics and advertises its presence.
#[async_trait]
pub trait PeripheralHost: Send + Sync {
    async fn notify(&self, device: &DeviceHandle, characteristic: Characteristic, data: &[u8]) -> Result<()>;
    async fn disconnect(&self, device: &DeviceHandle) -> Result<()>;
    async fn start_advertising(&self, unique_name: &str) -> Result<()>;
    async fn stop_advertising(&self) -> Result<()>;
    async fn update_advertised_name(&self, unique_name: &str) -> Result<()>;
    /// Currently usable MTU for `device`, queried at `MTU_REQUEST` time so
    /// the `MTU_RESPONSE` reply carries the real link value rather than the
    /// probe's own length.
    async fn current_mtu(&self, device: &DeviceHandle) -> Result<usize>;
}
