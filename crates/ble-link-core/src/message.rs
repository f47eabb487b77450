//! User-facing `Message` container and the split/reassemble boundary

use crate::config::MAX_SUB_MESSAGE_PAYLOAD;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::sequence::SequenceNumber;
use crate::submessage::{SubMessage, SubMessageType};
use crate::util::{chunk_bytes, normalize_header};

/// A complete application-level message, either about to be sent or already
/// reassembled from the wire.
///
/// `sender` is filled in by the receiver and is never transmitted; `receiver
/// == None` means "broadcast to every connected peer".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Option<Peer>,
    pub receiver: Option<Peer>,
    header: char,
    pub payload: Vec<u8>,
}

impl Message {
    /// Construct an outbound message. `header` is validated to exactly one
    /// UTF-8 character; extra characters are truncated, an empty string is
    /// rejected.
    pub fn new(header: &str, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let header = normalize_header(header)
            .ok_or_else(|| Error::InvalidHeader(header.to_string()))?;
        Ok(Self {
            sender: None,
            receiver: None,
            header,
            payload: payload.into(),
        })
    }

    pub fn with_receiver(mut self, receiver: Peer) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn header(&self) -> char {
        self.header
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_none()
    }

    /// Reconstruct a delivered message from its header char, the sending
    /// peer, and the reassembled payload bytes.
    pub(crate) fn received(sender: Peer, header: char, payload: Vec<u8>) -> Self {
        Self {
            sender: Some(sender),
            receiver: None,
            header,
            payload,
        }
    }

    /// `header_byte(s) ‖ payload`, the exact bytes that get split into
    /// sub-messages.
    pub fn header_and_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len_utf8() + self.payload.len());
        let mut header_buf = [0u8; 4];
        out.extend_from_slice(self.header.encode_utf8(&mut header_buf).as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Split this message into an ordered, finite sequence of `SubMessage`s
    /// under the given `message_id`.
    ///
    /// The data to split is `header_bytes ‖ payload`; chunks are at most
    /// `MAX_SUB_MESSAGE_PAYLOAD` bytes, `NON_FINAL` except the last, which is
    /// always `FINAL` — including the single-chunk case.
    pub fn split_into_sub_messages(&self, message_id: SequenceNumber) -> Vec<SubMessage> {
        split_data_into_sub_messages(message_id, &self.header_and_payload())
    }
}

/// A delivered binary-data payload, paired with the peer that sent it.
/// Carries no header byte, unlike [`Message`], since the binary stream is
/// headerless end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub sender: Peer,
    pub payload: Vec<u8>,
}

impl DataMessage {
    pub(crate) fn received(sender: Peer, payload: Vec<u8>) -> Self {
        Self { sender, payload }
    }
}

/// Split arbitrary bytes into sub-messages under `message_id`. Used directly
/// for the binary-data stream, which carries no header byte, and via
/// `Message::split_into_sub_messages` for text (after header prepending).
pub(crate) fn split_data_into_sub_messages(message_id: SequenceNumber, data: &[u8]) -> Vec<SubMessage> {
    let chunks = chunk_bytes(data, MAX_SUB_MESSAGE_PAYLOAD);
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let kind = if i == last { SubMessageType::Final } else { SubMessageType::NonFinal };
            SubMessage::new(message_id, SequenceNumber::from_value(3, i as u64), kind, chunk.to_vec())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_message_is_one_final_frame() {
        let msg = Message::new("a", b"hi".to_vec()).unwrap();
        let subs = msg.split_into_sub_messages(SequenceNumber::from_value(4, 0));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].kind, SubMessageType::Final);
        assert_eq!(&subs[0].payload[..], b"ahi");
    }

    #[test]
    fn multi_chunk_split_produces_expected_chunk_sizes() {
        let payload = vec![0xAB; 500];
        let msg = Message::new("x", payload).unwrap();
        let subs = msg.split_into_sub_messages(SequenceNumber::from_value(4, 0));
        let lens: Vec<usize> = subs.iter().map(|s| s.payload.len()).collect();
        assert_eq!(lens, vec![184, 184, 133]);
        assert_eq!(subs[0].kind, SubMessageType::NonFinal);
        assert_eq!(subs[1].kind, SubMessageType::NonFinal);
        assert_eq!(subs[2].kind, SubMessageType::Final);
        for (i, s) in subs.iter().enumerate() {
            assert_eq!(s.sub_sequence.value(), i as u64);
        }
    }

    #[test]
    fn header_truncates_extra_characters() {
        let msg = Message::new("abc", Vec::<u8>::new()).unwrap();
        assert_eq!(msg.header(), 'a');
    }

    #[test]
    fn empty_header_is_rejected() {
        assert!(Message::new("", Vec::<u8>::new()).is_err());
    }
}
