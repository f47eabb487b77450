//! GATT service and characteristic UUIDs for the single service both roles
//! advertise/discover, plus the static table describing which side writes
//! and which side notifies each characteristic.

use ble_link_core::host::Characteristic;
use uuid::Uuid;

/// Base UUID; each characteristic occupies one offset above the service at
/// index 0, in the `Characteristic` enum's declaration order.
const BASE: u128 = 0xBE11_0000_0000_0000_0000_0000_0000_0000;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(BASE);

/// Fallback ATT MTU when the host stack can't report a negotiated value.
pub const DEFAULT_ATT_MTU: usize = 23;

const ALL: [Characteristic; 16] = [
    Characteristic::ConnectionRequest,
    Characteristic::ConnectionResponse,
    Characteristic::MtuRequest,
    Characteristic::MtuResponse,
    Characteristic::MessageReceive,
    Characteristic::MessageSend,
    Characteristic::ReadResponseMessageReceived,
    Characteristic::DataReceive,
    Characteristic::DataSend,
    Characteristic::ReadResponseDataReceived,
    Characteristic::NameUpdateReceive,
    Characteristic::NameUpdateSend,
    Characteristic::ConnectionResumedReceive,
    Characteristic::ConnectionResumedSend,
    Characteristic::DisconnectionReceive,
    Characteristic::DisconnectionSend,
];

pub fn uuid_for(characteristic: Characteristic) -> Uuid {
    let offset = ALL.iter().position(|c| *c == characteristic).expect("exhaustive table") as u128;
    Uuid::from_u128(BASE + 1 + offset)
}

pub fn characteristic_for_uuid(uuid: Uuid) -> Option<Characteristic> {
    let value = uuid.as_u128();
    if value <= BASE {
        return None;
    }
    let offset = (value - BASE - 1) as usize;
    ALL.get(offset).copied()
}

/// True if the central side writes this characteristic (the peripheral's
/// GATT server exposes a write handler for it).
pub fn is_central_write(characteristic: Characteristic) -> bool {
    matches!(
        characteristic,
        Characteristic::ConnectionRequest
            | Characteristic::MtuRequest
            | Characteristic::MessageReceive
            | Characteristic::DataReceive
            | Characteristic::NameUpdateReceive
            | Characteristic::ConnectionResumedReceive
            | Characteristic::DisconnectionReceive
            | Characteristic::ReadResponseMessageReceived
            | Characteristic::ReadResponseDataReceived
    )
}

/// True if the peripheral side notifies this characteristic (the central
/// subscribes to it).
pub fn is_peripheral_notify(characteristic: Characteristic) -> bool {
    matches!(
        characteristic,
        Characteristic::ConnectionResponse
            | Characteristic::MtuResponse
            | Characteristic::MessageSend
            | Characteristic::DataSend
            | Characteristic::NameUpdateSend
            | Characteristic::ConnectionResumedSend
            | Characteristic::DisconnectionSend
            | Characteristic::ReadResponseMessageReceived
            | Characteristic::ReadResponseDataReceived
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_characteristic_has_a_unique_uuid_round_trip() {
        for c in ALL {
            let uuid = uuid_for(c);
            assert_eq!(characteristic_for_uuid(uuid), Some(c));
        }
    }

    #[test]
    fn read_response_characteristics_are_bidirectional() {
        assert!(is_central_write(Characteristic::ReadResponseMessageReceived));
        assert!(is_peripheral_notify(Characteristic::ReadResponseMessageReceived));
    }

    #[test]
    fn service_uuid_is_not_a_characteristic() {
        assert_eq!(characteristic_for_uuid(SERVICE_UUID), None);
    }
}
