//! Error handling for the terminal client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("link error: {0}")]
    Link(#[from] ble_link_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("no peer named {0:?} has been discovered yet")]
    PeerNotDiscovered(String),

    #[error("connecting to {peer} failed: {reason}")]
    ConnectFailed { peer: String, reason: String },

    #[error("Bluetooth LE is not supported on this host")]
    BluetoothLeNotSupported,
}

pub type Result<T> = std::result::Result<T, CliError>;
