//! Transport-agnostic core of a peer-to-peer Bluetooth Low Energy reliable
//! messaging protocol.
//!
//! This crate implements the handshake, MTU negotiation, chunking and
//! reassembly, retransmission, multi-peer dispatch and reconnection state
//! machines against the [`host`] module's `CentralHost`/`PeripheralHost`
//! traits, rather than against a concrete OS BLE stack. An adapter crate
//! (e.g. `ble-link-btleplug`) fulfills those traits against real hardware;
//! [`testing::FakeCentralHost`]/[`testing::FakePeripheralHost`] fulfill them
//! in memory, so the whole protocol is exercised by `cargo test` on hosts
//! with no Bluetooth radio at all.
//!
//! The top-level entry point is [`communicator::Communicator`], which owns
//! one CENTRAL and one PERIPHERAL [`connection::Connection`], each holding a
//! set of [`channel::Channel`]s — one per live link to a remote peer.

pub mod callbacks;
pub mod channel;
pub mod communicator;
pub mod config;
pub mod connection;
pub mod error;
pub mod host;
pub mod message;
pub mod peer;
pub mod sequence;
pub mod submessage;
pub mod testing;
mod timer;
mod util;

pub use callbacks::Callbacks;
pub use channel::{Channel, Role, State, StreamKind};
pub use communicator::Communicator;
pub use config::Config;
pub use connection::Connection;
pub use error::{CommandOutcome, Error, Result};
pub use host::{CentralHost, Characteristic, DeviceHandle, HostEvent, PeripheralHost};
pub use message::{DataMessage, Message};
pub use peer::Peer;
pub use sequence::SequenceNumber;
pub use submessage::{SubMessage, SubMessageType};
