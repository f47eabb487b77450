//! Remote-device identity and live-link status

use crate::config::DEVICE_ID_SUFFIX_LEN;
use crate::host::DeviceHandle;

/// A remote device: identity plus a snapshot of its current link status.
///
/// The authoritative, mutable status lives inside the owning `Channel`; this
/// type is the cheap, cloneable snapshot handed to the application, so
/// callers can't reach in and mutate internal state by holding onto one.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Advertised name: user-chosen name + a 2-char persistent device-id
    /// suffix, at most 20 UTF-8 bytes total.
    unique_name: String,
    device_handle: Option<DeviceHandle>,
    pub hardware_connected: bool,
    pub connected: bool,
    pub reconnecting: bool,
    pub requesting_reconnection: bool,
    pub disconnecting: bool,
}

impl Peer {
    /// Construct a peer from its advertised `unique_name`, before any OS-level
    /// handle is known (e.g. a peripheral-side partial peer awaiting
    /// `CONNECTION_REQUEST`).
    pub fn new(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            device_handle: None,
            hardware_connected: false,
            connected: false,
            reconnecting: false,
            requesting_reconnection: false,
            disconnecting: false,
        }
    }

    pub fn with_device_handle(mut self, handle: DeviceHandle) -> Self {
        self.device_handle = Some(handle);
        self
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// `unique_name` minus its trailing device-id suffix.
    pub fn name(&self) -> &str {
        let total = self.unique_name.chars().count();
        if total <= DEVICE_ID_SUFFIX_LEN {
            return &self.unique_name;
        }
        let cut = self
            .unique_name
            .char_indices()
            .nth(total - DEVICE_ID_SUFFIX_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.unique_name.len());
        &self.unique_name[..cut]
    }

    pub fn device_handle(&self) -> Option<&DeviceHandle> {
        self.device_handle.as_ref()
    }

    pub fn set_device_handle(&mut self, handle: DeviceHandle) {
        self.device_handle = Some(handle);
    }

    pub fn set_unique_name(&mut self, unique_name: impl Into<String>) {
        self.unique_name = unique_name.into();
    }

    /// Equality by `device_handle.address` when both peers have one,
    /// otherwise by `unique_name`. This is the internal identity rule;
    /// application code is expected to compare by `unique_name()` directly.
    pub fn identity_eq(&self, other: &Peer) -> bool {
        match (&self.device_handle, &other.device_handle) {
            (Some(a), Some(b)) => a.address() == b.address(),
            _ => self.unique_name == other.unique_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_strips_two_char_suffix() {
        let peer = Peer::new("Alice42");
        assert_eq!(peer.name(), "Alice");
    }

    #[test]
    fn identity_eq_prefers_device_handle() {
        let a = Peer::new("Alice42").with_device_handle(DeviceHandle::new("AA:BB"));
        let b = Peer::new("DifferentName").with_device_handle(DeviceHandle::new("AA:BB"));
        assert!(a.identity_eq(&b));
    }

    #[test]
    fn identity_eq_falls_back_to_unique_name() {
        let a = Peer::new("Alice42");
        let b = Peer::new("Alice42");
        assert!(a.identity_eq(&b));
        let c = Peer::new("Bob99");
        assert!(!a.identity_eq(&c));
    }
}
