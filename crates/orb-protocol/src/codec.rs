use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, MAX_MESSAGE_SIZE};

/// Length of the frame prefix: 4 bytes length plus 1 byte tag.
pub const HEADER_LEN: usize = 5;

/// Codec for framed backend messages.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a message with framing: [4 bytes len][1 byte tag][payload].
    /// The length counts the tag and the payload.
    pub fn encode(msg: &Message) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(Message, usize)> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = Self::frame_len([data[0], data[1], data[2], data[3]])?;
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let msg = Self::decode_body(data[4], &data[HEADER_LEN..total])?;
        Ok((msg, total))
    }

    /// Validate a length prefix and return the number of bytes that follow
    /// it (tag plus payload).
    pub fn frame_len(prefix: [u8; 4]) -> ProtocolResult<usize> {
        let len = u32::from_be_bytes(prefix) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(len)
    }

    /// Decode a payload and check it against the tag from the frame header.
    pub fn decode_body(tag: u8, payload: &[u8]) -> ProtocolResult<Message> {
        let msg: Message = bincode::deserialize(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::TagMismatch {
                header: tag,
                payload: msg.type_name(),
            });
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PutMode;
    use orb_types::{ObjectId, OrbError, Stage};

    #[test]
    fn frame_roundtrip() {
        let msg = Message::PutState {
            id: ObjectId::new(),
            state: vec![1, 2, 3],
            mode: PutMode::Replica,
        };
        let encoded = FrameCodec::encode(&msg).unwrap();
        assert_eq!(encoded[4], 6);
        let (decoded, consumed) = FrameCodec::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn errors_cross_the_wire_intact() {
        let err = OrbError::LockTimeout {
            id: ObjectId::new(),
            mode: orb_types::LockMode::Write,
            stage: Stage::Lock,
        };
        let encoded = FrameCodec::encode(&Message::Error(err.clone())).unwrap();
        let (decoded, _) = FrameCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, Message::Error(err));
    }

    #[test]
    fn decode_consumes_one_frame_of_many() {
        let mut data = FrameCodec::encode(&Message::Done).unwrap();
        let first = data.len();
        data.extend(FrameCodec::encode(&Message::Count(7)).unwrap());
        let (msg, consumed) = FrameCodec::decode(&data).unwrap();
        assert_eq!(msg, Message::Done);
        assert_eq!(consumed, first);
        let (msg, _) = FrameCodec::decode(&data[consumed..]).unwrap();
        assert_eq!(msg, Message::Count(7));
    }

    #[test]
    fn decode_truncated() {
        let err = FrameCodec::decode(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));

        let encoded = FrameCodec::encode(&Message::Count(1)).unwrap();
        let err = FrameCodec::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn decode_zero_length() {
        let data = [0u8, 0, 0, 0, 0];
        let err = FrameCodec::decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let err = FrameCodec::frame_len(u32::MAX.to_be_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn tag_must_match_payload() {
        let mut encoded = FrameCodec::encode(&Message::Done).unwrap();
        encoded[4] = 1;
        let err = FrameCodec::decode(&encoded).unwrap_err();
        assert!(matches!(err, ProtocolError::TagMismatch { header: 1, payload: "Done" }));
    }
}
