//! On-wire sub-message framing and codec

use smallvec::SmallVec;

use crate::config::{MAX_SUB_MESSAGE_PAYLOAD, MESSAGE_ID_WIDTH, SUB_MESSAGE_HEADER, SUB_SEQUENCE_WIDTH};
use crate::error::{Error, Result};
use crate::sequence::SequenceNumber;

/// `type` byte discriminating the last sub-message of a split `Message` from
/// every sub-message before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMessageType {
    NonFinal,
    Final,
}

impl SubMessageType {
    fn to_byte(self) -> u8 {
        match self {
            SubMessageType::NonFinal => b'1',
            SubMessageType::Final => b'2',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'1' => Some(SubMessageType::NonFinal),
            b'2' => Some(SubMessageType::Final),
            _ => None,
        }
    }
}

/// One framed chunk of a split application `Message`, as it appears on the
/// wire: `message_id(4) || sub_sequence(3) || type(1) || payload(<=184)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMessage {
    pub message_id: SequenceNumber,
    pub sub_sequence: SequenceNumber,
    pub kind: SubMessageType,
    pub payload: SmallVec<[u8; MAX_SUB_MESSAGE_PAYLOAD]>,
}

impl SubMessage {
    pub fn new(
        message_id: SequenceNumber,
        sub_sequence: SequenceNumber,
        kind: SubMessageType,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            message_id,
            sub_sequence,
            kind,
            payload: SmallVec::from_vec(payload.into()),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, SubMessageType::Final)
    }

    /// Encode to the exact on-wire byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SUB_MESSAGE_HEADER + self.payload.len());
        out.extend_from_slice(self.message_id.to_bytes().as_ref());
        out.extend_from_slice(self.sub_sequence.to_bytes().as_ref());
        out.push(self.kind.to_byte());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode from bytes received off a characteristic write/notification.
    ///
    /// Fails with `Error::MalformedFrame` when shorter than the header or
    /// carrying an unrecognized type byte.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SUB_MESSAGE_HEADER {
            return Err(Error::MalformedFrame {
                reason: format!("frame of {} bytes shorter than header ({})", bytes.len(), SUB_MESSAGE_HEADER),
            });
        }
        let (id_bytes, rest) = bytes.split_at(MESSAGE_ID_WIDTH);
        let (seq_bytes, rest) = rest.split_at(SUB_SEQUENCE_WIDTH);
        let (type_byte, payload) = rest.split_at(1);

        let message_id = SequenceNumber::from_bytes(id_bytes)
            .ok_or_else(|| Error::MalformedFrame { reason: "invalid message_id symbol".into() })?;
        let sub_sequence = SequenceNumber::from_bytes(seq_bytes)
            .ok_or_else(|| Error::MalformedFrame { reason: "invalid sub_sequence symbol".into() })?;
        let kind = SubMessageType::from_byte(type_byte[0])
            .ok_or_else(|| Error::MalformedFrame { reason: format!("invalid type byte {:#x}", type_byte[0]) })?;

        Ok(Self {
            message_id,
            sub_sequence,
            kind,
            payload: SmallVec::from_slice(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(w: usize, v: u64) -> SequenceNumber {
        SequenceNumber::from_value(w, v)
    }

    #[test]
    fn encode_decode_round_trip() {
        let sm = SubMessage::new(seq(4, 0), seq(3, 0), SubMessageType::Final, b"ahi".to_vec());
        let encoded = sm.encode();
        assert_eq!(encoded.len(), SUB_MESSAGE_HEADER + 3);
        let decoded = SubMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, sm);
    }

    #[test]
    fn decode_rejects_short_frames() {
        let err = SubMessage::decode(&[b'0'; 5]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }

    #[test]
    fn decode_rejects_bad_type_byte() {
        let mut bytes = seq(4, 0).to_bytes().as_ref().to_vec();
        bytes.extend_from_slice(seq(3, 0).to_bytes().as_ref());
        bytes.push(b'9'); // neither '1' nor '2'
        let err = SubMessage::decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }
}
