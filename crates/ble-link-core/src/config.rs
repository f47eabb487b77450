//! Tunable protocol constants

use std::time::Duration;

/// Target link MTU in bytes: the central writes 247 zero-bytes to
/// `MTU_REQUEST` during the handshake probe.
pub const TARGET_LINK_MTU: usize = 247;

/// Total size of one on-wire sub-message frame.
pub const SUB_MESSAGE_TOTAL: usize = 192;

/// Size of the sub-message header (`message_id` ‖ `sub_sequence` ‖ `type`).
pub const SUB_MESSAGE_HEADER: usize = 8;

/// Maximum payload carried by one sub-message.
pub const MAX_SUB_MESSAGE_PAYLOAD: usize = SUB_MESSAGE_TOTAL - SUB_MESSAGE_HEADER;

/// Width, in UTF-8 chars, of a `message_id`.
pub const MESSAGE_ID_WIDTH: usize = 4;

/// Width, in UTF-8 chars, of a `sub_sequence`.
pub const SUB_SEQUENCE_WIDTH: usize = 3;

/// Dense printable alphabet used to encode `SequenceNumber`s on the wire.
/// `'0'..='9'`, `'A'..='Z'`, `'a'..='z'` gives 62 symbols; lexicographic order
/// over this slice is monotone with numeric order as long as entries stay
/// sorted by codepoint, which they are here. 62^4 ~= 14.7M distinct
/// `message_id`s before wrap — short of the "4 billion" the original claims,
/// but an honest accounting of a 4-char printable counter (see
/// `DESIGN.md` "Open Questions").
pub const SEQUENCE_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Maximum advertised `unique_name` length in UTF-8 bytes.
pub const MAX_UNIQUE_NAME_BYTES: usize = 20;

/// Length, in UTF-8 bytes, of the persistent random device-id suffix
/// appended to the user-chosen name to form `unique_name`.
pub const DEVICE_ID_SUFFIX_LEN: usize = 2;

/// `recently_delivered_ids` ring size as a multiple of the in-flight
/// message cap; needs only to be at least `MAX_PENDING_MESSAGES * 2` to
/// guarantee a retransmitted duplicate is still in the window when it
/// arrives.
pub const MAX_PENDING_MESSAGES: usize = 32;

/// Runtime-tunable timers and limits for one `Communicator`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Handshake must complete within this window or the link is torn down.
    pub handshake_timeout: Duration,
    /// A sub-message not acked within this window is retransmitted.
    pub ack_timeout: Duration,
    /// Disconnect-ack wait before the OS-level disconnect is forced.
    pub disconnect_ack_timeout: Duration,
    /// Window during which a dropped link may be resumed.
    pub reconnection_timeout: Duration,
    /// Target link MTU requested during handshake.
    pub target_mtu: usize,
    /// Size of the `recently_delivered_ids` dedupe ring, in message ids.
    pub dedupe_ring_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(1),
            disconnect_ack_timeout: Duration::from_secs(5),
            reconnection_timeout: Duration::from_secs(30),
            target_mtu: TARGET_LINK_MTU,
            dedupe_ring_size: MAX_PENDING_MESSAGES * 2,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    pub fn with_ack_timeout(mut self, d: Duration) -> Self {
        self.ack_timeout = d;
        self
    }

    pub fn with_disconnect_ack_timeout(mut self, d: Duration) -> Self {
        self.disconnect_ack_timeout = d;
        self
    }

    pub fn with_reconnection_timeout(mut self, d: Duration) -> Self {
        self.reconnection_timeout = d;
        self
    }

    pub fn with_target_mtu(mut self, mtu: usize) -> Self {
        self.target_mtu = mtu;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));
        assert_eq!(cfg.ack_timeout, Duration::from_secs(1));
        assert_eq!(cfg.disconnect_ack_timeout, Duration::from_secs(5));
        assert_eq!(cfg.reconnection_timeout, Duration::from_secs(30));
        assert_eq!(cfg.target_mtu, 247);
    }

    #[test]
    fn sub_message_sizes_are_consistent() {
        assert_eq!(SUB_MESSAGE_HEADER, MESSAGE_ID_WIDTH + SUB_SEQUENCE_WIDTH + 1);
        assert_eq!(MAX_SUB_MESSAGE_PAYLOAD, 184);
    }
}
