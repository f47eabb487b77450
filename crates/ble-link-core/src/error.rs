//! Error types for the BLE link core protocol

use thiserror::Error;

/// Result alias used throughout `ble-link-core`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transport/protocol state machines.
///
/// Transient link hiccups (a single failed write, one missed ack) are
/// absorbed by the retry loop in `channel::send` and never surface as an
/// `Error`; everything here is surfaced to the application exactly once.
#[derive(Error, Debug)]
pub enum Error {
    #[error("handshake with {peer} timed out")]
    HandshakeTimeout { peer: String },

    #[error("connection request rejected by {peer}")]
    ConnectionRejected { peer: String },

    #[error("malformed sub-message frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("reconnection window for {peer} elapsed with no re-discovery")]
    ReconnectTimeout { peer: String },

    #[error("disconnect of {peer} never reached STATE_DISCONNECTED")]
    DisconnectionFailed { peer: String },

    #[error("no channel for peer {peer}")]
    PeerNotFound { peer: String },

    #[error("operation invoked off the designated UI thread")]
    NotMainThread,

    #[error("already started")]
    AlreadyStarted,

    #[error("already stopped")]
    AlreadyStopped,

    #[error("communicator is being destroyed")]
    Destroying,

    #[error("Bluetooth LE is not supported on this host")]
    BluetoothLeNotSupported,

    #[error("underlying BLE host error: {0}")]
    Host(String),

    #[error("message header must be exactly one UTF-8 character, got {0:?}")]
    InvalidHeader(String),
}

/// Stable integer return codes for `Communicator` operations, so FFI/UI
/// glue can match on fixed values instead of threading `Error` across the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CommandOutcome {
    Success = 0,
    ConnectionRejected = 1,
    Error = -1,
    AlreadyStarted = -3,
    AlreadyStopped = -4,
    NotMainThread = -5,
    Destroying = -6,
    BluetoothLeNotSupported = -7,
}

impl From<&Error> for CommandOutcome {
    fn from(err: &Error) -> Self {
        match err {
            Error::ConnectionRejected { .. } => CommandOutcome::ConnectionRejected,
            Error::NotMainThread => CommandOutcome::NotMainThread,
            Error::AlreadyStarted => CommandOutcome::AlreadyStarted,
            Error::AlreadyStopped => CommandOutcome::AlreadyStopped,
            Error::Destroying => CommandOutcome::Destroying,
            Error::BluetoothLeNotSupported => CommandOutcome::BluetoothLeNotSupported,
            _ => CommandOutcome::Error,
        }
    }
}
