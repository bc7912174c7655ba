//! Framing: one message per datagram, UTF-8 JSON text.

use crate::protocol::Message;

/// Largest payload accepted or produced. Keeps a broadcast inside a single radio/link frame.
pub const MAX_DATAGRAM_LEN: usize = 1400;

/// Encode a message into a single datagram payload.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_DATAGRAM_LEN {
        return Err(EncodeError::TooLarge(payload.len()));
    }
    Ok(payload)
}

/// Error encoding a message (serializer or size limit).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("datagram too large: {0} bytes")]
    TooLarge(usize),
}

/// Decode one datagram payload. Any failure means "unrecognized message"; callers drop it.
pub fn decode_message(bytes: &[u8]) -> Result<Message, DecodeError> {
    if bytes.len() > MAX_DATAGRAM_LEN {
        return Err(DecodeError::TooLarge(bytes.len()));
    }
    let text = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}

/// Error decoding a datagram (too large, not UTF-8, or not one of the known shapes).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram too large: {0} bytes")]
    TooLarge(usize),
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unrecognized message: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{SessionId, StudentId};
    use crate::protocol::{AckStatus, PresenceAck, PresenceClaim, SessionBroadcast};

    #[test]
    fn broadcast_wire_shape() {
        let msg = Message::SessionBroadcast(SessionBroadcast::new(
            SessionId::from("SES1234"),
            8888,
            None,
        ));
        let bytes = encode_message(&msg).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "session-broadcast",
                "sessionId": "SES1234",
                "listenPort": 8888
            })
        );
        assert_eq!(decode_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn broadcast_accepts_legacy_port_field() {
        let raw = br#"{"type":"session-broadcast","sessionId":"SES9","port":40123}"#;
        match decode_message(raw).unwrap() {
            Message::SessionBroadcast(b) => {
                assert_eq!(b.session_id.as_str(), "SES9");
                assert_eq!(b.listen_port, 40123);
                assert_eq!(b.label, None);
            }
            other => panic!("expected SessionBroadcast, got {other:?}"),
        }
    }

    #[test]
    fn claim_and_ack_are_distinguished_by_fields() {
        let claim = br#"{"id":"STU42","timestamp":"2024-03-01T09:00:00.000Z"}"#;
        assert_eq!(
            decode_message(claim).unwrap(),
            Message::PresenceClaim(PresenceClaim {
                id: StudentId::from("STU42"),
                timestamp: "2024-03-01T09:00:00.000Z".into(),
            })
        );

        let ack = br#"{"status":"success","sessionId":"SES1"}"#;
        match decode_message(ack).unwrap() {
            Message::PresenceAck(PresenceAck { status, session_id }) => {
                assert_eq!(status, AckStatus::Success);
                assert_eq!(session_id.as_str(), "SES1");
            }
            other => panic!("expected PresenceAck, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = br#"{"id":"STU1","timestamp":"t","v":2,"extra":[1,2]}"#;
        assert!(matches!(
            decode_message(raw),
            Ok(Message::PresenceClaim(_))
        ));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(decode_message(b"not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_message(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::Utf8(_))
        ));
        // Wrong field types.
        assert!(decode_message(br#"{"id":42,"timestamp":"t"}"#).is_err());
        // Non-success ack status.
        assert!(decode_message(br#"{"status":"error","sessionId":"SES1"}"#).is_err());
        // Unknown broadcast type.
        assert!(decode_message(br#"{"type":"hello","sessionId":"S","listenPort":1}"#).is_err());
        let big = vec![b' '; MAX_DATAGRAM_LEN + 1];
        assert!(matches!(decode_message(&big), Err(DecodeError::TooLarge(_))));
    }

    #[test]
    fn oversized_label_fails_to_encode() {
        let msg = Message::SessionBroadcast(SessionBroadcast::new(
            SessionId::from("SES1"),
            8888,
            Some("x".repeat(MAX_DATAGRAM_LEN)),
        ));
        assert!(matches!(encode_message(&msg), Err(EncodeError::TooLarge(_))));
    }
}
