//! Wire codec for the heartbeat protocol.
//!
//! Every datagram carries a single UTF-8 message of exactly four
//! space-separated tokens:
//!
//! ```text
//! <sender_instance_id> <sender_ipv4> <REQ|RES> <payload>
//! ```
//!
//! The payload of a request is the literal keyword `metrics`; the
//! payload of a response is an opaque comma-delimited metrics snapshot.
//! Anything that does not fit this shape is malformed and dropped by
//! the receiver.

use thiserror::Error;

/// The only request payload the protocol currently knows.
pub const METRICS_REQUEST: &str = "metrics";

/// Message direction marker, the third wire token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn token(self) -> &'static str {
        match self {
            MessageKind::Request => "REQ",
            MessageKind::Response => "RES",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "REQ" => Some(MessageKind::Request),
            "RES" => Some(MessageKind::Response),
            _ => None,
        }
    }
}

/// Errors produced while decoding an inbound datagram.
///
/// All of these are recoverable: the listener logs the error and drops
/// the datagram without replying.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("expected 4 space-separated tokens, got {0}")]
    TokenCount(usize),
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("datagram is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),
}

/// One decoded heartbeat message.
///
/// `sender_ip` is the sender's own view of its IPv4 address, not the
/// socket's observed source address; replies are sent back to it on
/// the well-known protocol port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: String,
    pub sender_ip: String,
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    /// Build a metrics request originating from the local node.
    pub fn metrics_request(sender_id: &str, sender_ip: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_ip: sender_ip.to_string(),
            kind: MessageKind::Request,
            payload: METRICS_REQUEST.to_string(),
        }
    }

    /// Build a metrics response carrying `snapshot` as its payload.
    pub fn metrics_response(sender_id: &str, sender_ip: &str, snapshot: String) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_ip: sender_ip.to_string(),
            kind: MessageKind::Response,
            payload: snapshot,
        }
    }

    /// Serialise into the four-token wire form.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{} {} {} {}",
            self.sender_id,
            self.sender_ip,
            self.kind.token(),
            self.payload
        )
        .into_bytes()
    }

    /// Parse a received datagram.
    ///
    /// Splitting is on single spaces, so an empty payload still counts
    /// as the fourth token.
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(datagram)?;
        let tokens: Vec<&str> = text.split(' ').collect();
        if tokens.len() != 4 {
            return Err(ProtocolError::TokenCount(tokens.len()));
        }

        let kind = MessageKind::from_token(tokens[2])
            .ok_or_else(|| ProtocolError::UnknownKind(tokens[2].to_string()))?;

        Ok(Self {
            sender_id: tokens[0].to_string(),
            sender_ip: tokens[1].to_string(),
            kind,
            payload: tokens[3].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let msg = Message::metrics_request("node-a", "10.0.0.2");
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.payload, METRICS_REQUEST);
    }

    #[test]
    fn response_round_trips() {
        let msg = Message::metrics_response("node-b", "10.0.0.3", "12.34,1000,2000,500,600".into());
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn too_few_tokens_is_malformed() {
        let err = Message::decode(b"node-a 10.0.0.2 REQ").unwrap_err();
        assert!(matches!(err, ProtocolError::TokenCount(3)));
    }

    #[test]
    fn too_many_tokens_is_malformed() {
        let err = Message::decode(b"node-a 10.0.0.2 REQ metrics extra").unwrap_err();
        assert!(matches!(err, ProtocolError::TokenCount(5)));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = Message::decode(b"node-a 10.0.0.2 PUSH metrics").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(_)));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = Message::decode(&[0xff, 0xfe, 0x20, 0x20, 0x20]).unwrap_err();
        assert!(matches!(err, ProtocolError::Encoding(_)));
    }

    #[test]
    fn empty_payload_still_counts_as_a_token() {
        let decoded = Message::decode(b"node-a 10.0.0.2 RES ").unwrap();
        assert_eq!(decoded.kind, MessageKind::Response);
        assert_eq!(decoded.payload, "");
    }
}
