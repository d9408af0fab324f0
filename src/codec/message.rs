//! Application messages and their reserved fields.
//!
//! A message body is either a JSON object with reserved top-level fields
//! (`_msgtype`, `_sid`, `_seq`, `_ack`) or a compact binary record
//! ([`BinaryMessage`]) with the same fields as typed members. Everything else
//! in the body is opaque to the engine.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::constants::{ACK_FIELD, MESSAGE_TYPE_FIELD, SEQ_FIELD, SESSION_ID_FIELD};
use crate::core::{Encoding, FrameError};
use crate::crypto::EncryptionType;
use crate::session::SessionId;

/// Message type: a name or, in binary encoding, a numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// String message type.
    Name(String),
    /// Integer message type.
    Code(i32),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Name(name) => f.write_str(name),
            MessageType::Code(code) => write!(f, "{code}"),
        }
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        MessageType::Name(name.to_string())
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        MessageType::Name(name)
    }
}

impl From<i32> for MessageType {
    fn from(code: i32) -> Self {
        MessageType::Code(code)
    }
}

/// Compact binary body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMessage {
    /// String message type.
    pub msgtype: Option<String>,
    /// Numeric message type.
    pub msgtype2: Option<i32>,
    /// Session id in raw form.
    pub sid: Option<Vec<u8>>,
    /// Sequence number.
    pub seq: Option<u32>,
    /// Acknowledgement number.
    pub ack: Option<u32>,
    /// Application payload.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
enum Content {
    Json(Map<String, Value>),
    Binary(BinaryMessage),
}

/// One logical message.
///
/// Sequence numbers are assigned once, on first send; re-encoding the same
/// message for retransmission reuses it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    content: Content,
    seq: Option<u32>,
    use_seq: bool,
    use_sent_queue: bool,
    encryption: EncryptionType,
}

impl Message {
    fn from_content(content: Content) -> Self {
        Self {
            content,
            seq: None,
            use_seq: false,
            use_sent_queue: false,
            encryption: EncryptionType::Default,
        }
    }

    /// JSON message; `msg_type` is stored in `_msgtype` when given.
    pub fn json(msg_type: Option<&str>, mut body: Map<String, Value>) -> Self {
        if let Some(msg_type) = msg_type {
            body.insert(MESSAGE_TYPE_FIELD.to_string(), Value::String(msg_type.to_string()));
        }
        Self::from_content(Content::Json(body))
    }

    /// JSON message from a document string, which must be an object.
    pub fn from_json_str(msg_type: Option<&str>, json: &str) -> Result<Self, FrameError> {
        let body = if json.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(json) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(FrameError::InvalidBody("JSON body must be an object".into())),
                Err(e) => return Err(FrameError::InvalidBody(e.to_string())),
            }
        };
        Ok(Self::json(msg_type, body))
    }

    /// Binary message with an opaque payload.
    pub fn binary(msg_type: impl Into<MessageType>, body: Vec<u8>) -> Self {
        let mut message = BinaryMessage {
            body,
            ..Default::default()
        };
        match msg_type.into() {
            MessageType::Name(name) => message.msgtype = Some(name),
            MessageType::Code(code) => message.msgtype2 = Some(code),
        }
        Self::from_content(Content::Binary(message))
    }

    /// Wrap an already-built binary record.
    pub fn from_binary(message: BinaryMessage) -> Self {
        Self::from_content(Content::Binary(message))
    }

    /// Message without type or payload.
    pub fn empty(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Json => Self::from_content(Content::Json(Map::new())),
            Encoding::Binary => Self::from_content(Content::Binary(BinaryMessage::default())),
        }
    }

    /// Typed payload message. JSON flattens the payload into the top-level
    /// object; binary stores it bincode-encoded in the body.
    pub fn with_payload<T: Serialize>(
        encoding: Encoding,
        msg_type: &str,
        payload: &T,
    ) -> Result<Self, FrameError> {
        match encoding {
            Encoding::Json => match serde_json::to_value(payload) {
                Ok(Value::Object(map)) => Ok(Self::json(Some(msg_type), map)),
                Ok(_) => Err(FrameError::InvalidBody("payload is not an object".into())),
                Err(e) => Err(FrameError::InvalidBody(e.to_string())),
            },
            Encoding::Binary => {
                let body = bincode::serialize(payload)
                    .map_err(|e| FrameError::InvalidBody(e.to_string()))?;
                Ok(Self::binary(msg_type, body))
            }
        }
    }

    /// Ack-only message.
    pub fn ack_only(encoding: Encoding, ack: u32) -> Self {
        let mut message = Self::empty(encoding);
        message.set_ack(ack);
        message
    }

    /// Decode a received body.
    pub fn decode(encoding: Encoding, bytes: &[u8]) -> Result<Self, FrameError> {
        match encoding {
            Encoding::Json => match serde_json::from_slice::<Value>(bytes) {
                Ok(Value::Object(map)) => Ok(Self::from_content(Content::Json(map))),
                Ok(_) => Err(FrameError::InvalidBody("JSON body must be an object".into())),
                Err(e) => Err(FrameError::InvalidBody(e.to_string())),
            },
            Encoding::Binary => bincode::deserialize::<BinaryMessage>(bytes)
                .map(Message::from_binary)
                .map_err(|e| FrameError::InvalidBody(e.to_string())),
        }
    }

    /// Encode the body for the wire.
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        match &self.content {
            Content::Json(map) => {
                serde_json::to_vec(map).map_err(|e| FrameError::InvalidBody(e.to_string()))
            }
            Content::Binary(message) => {
                bincode::serialize(message).map_err(|e| FrameError::InvalidBody(e.to_string()))
            }
        }
    }

    /// Body encoding.
    pub fn encoding(&self) -> Encoding {
        match self.content {
            Content::Json(_) => Encoding::Json,
            Content::Binary(_) => Encoding::Binary,
        }
    }

    /// Message type, if any.
    pub fn msg_type(&self) -> Option<MessageType> {
        match &self.content {
            Content::Json(map) => map
                .get(MESSAGE_TYPE_FIELD)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(MessageType::from),
            Content::Binary(message) => match (&message.msgtype, message.msgtype2) {
                (Some(name), _) if !name.is_empty() => Some(MessageType::Name(name.clone())),
                (_, Some(code)) if code != 0 => Some(MessageType::Code(code)),
                _ => None,
            },
        }
    }

    /// Session id carried in the body.
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.content {
            Content::Json(map) => map
                .get(SESSION_ID_FIELD)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(SessionId::from_text),
            Content::Binary(message) => message
                .sid
                .as_ref()
                .filter(|sid| !sid.is_empty())
                .map(|sid| SessionId::from_bytes(sid.clone())),
        }
    }

    /// Write the session id in the form this encoding uses.
    pub fn set_session_id(&mut self, session_id: &SessionId) {
        match &mut self.content {
            Content::Json(map) => {
                map.insert(
                    SESSION_ID_FIELD.to_string(),
                    Value::String(session_id.as_text().to_string()),
                );
            }
            Content::Binary(message) => message.sid = Some(session_id.as_bytes().to_vec()),
        }
    }

    /// Sequence number field of the body.
    pub fn seq_field(&self) -> Option<u32> {
        self.number_field(SEQ_FIELD)
    }

    /// Acknowledgement field of the body.
    pub fn ack(&self) -> Option<u32> {
        self.number_field(ACK_FIELD)
    }

    /// Remove and return the sequence number field.
    pub fn take_seq(&mut self) -> Option<u32> {
        match &mut self.content {
            Content::Json(map) => map.remove(SEQ_FIELD).and_then(|v| value_as_u32(&v)),
            Content::Binary(message) => message.seq.take(),
        }
    }

    /// Remove and return the acknowledgement field.
    pub fn take_ack(&mut self) -> Option<u32> {
        match &mut self.content {
            Content::Json(map) => map.remove(ACK_FIELD).and_then(|v| value_as_u32(&v)),
            Content::Binary(message) => message.ack.take(),
        }
    }

    /// Set the acknowledgement field.
    pub fn set_ack(&mut self, ack: u32) {
        match &mut self.content {
            Content::Json(map) => {
                map.insert(ACK_FIELD.to_string(), Value::from(ack));
            }
            Content::Binary(message) => message.ack = Some(ack),
        }
    }

    /// Assign a sequence number from `next` unless one was already assigned,
    /// and write it into the body. Returns the message's sequence number.
    pub fn assign_seq(&mut self, next: &mut u32) -> u32 {
        let seq = match self.seq {
            Some(seq) => seq,
            None => {
                let seq = *next;
                *next = next.wrapping_add(1);
                self.seq = Some(seq);
                seq
            }
        };
        match &mut self.content {
            Content::Json(map) => {
                map.insert(SEQ_FIELD.to_string(), Value::from(seq));
            }
            Content::Binary(message) => message.seq = Some(seq),
        }
        seq
    }

    /// Assigned sequence number.
    pub fn seq(&self) -> Option<u32> {
        self.seq
    }

    /// Whether a sequence number is attached when reliability is on.
    pub fn use_seq(&self) -> bool {
        self.use_seq
    }

    /// Enable or disable sequence numbering.
    pub fn set_use_seq(&mut self, use_seq: bool) {
        self.use_seq = use_seq;
    }

    /// Whether the message is kept until acknowledged.
    pub fn use_sent_queue(&self) -> bool {
        self.use_sent_queue
    }

    /// Enable or disable retention until acknowledged.
    pub fn set_use_sent_queue(&mut self, use_sent_queue: bool) {
        self.use_sent_queue = use_sent_queue;
    }

    /// Cipher used to send this message.
    pub fn encryption(&self) -> EncryptionType {
        self.encryption
    }

    /// Send this message with a specific cipher.
    pub fn with_encryption(mut self, encryption: EncryptionType) -> Self {
        self.encryption = encryption;
        self
    }

    /// Typed payload (inverse of [`with_payload`](Self::with_payload)).
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        match &self.content {
            Content::Json(map) => serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| FrameError::InvalidBody(e.to_string())),
            Content::Binary(message) => bincode::deserialize(&message.body)
                .map_err(|e| FrameError::InvalidBody(e.to_string())),
        }
    }

    /// JSON object, for JSON messages.
    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match &self.content {
            Content::Json(map) => Some(map),
            Content::Binary(_) => None,
        }
    }

    /// Binary record, for binary messages.
    pub fn as_binary(&self) -> Option<&BinaryMessage> {
        match &self.content {
            Content::Binary(message) => Some(message),
            Content::Json(_) => None,
        }
    }

    /// JSON document as text; binary messages render their payload lossily.
    pub fn to_json_string(&self) -> String {
        match &self.content {
            Content::Json(map) => Value::Object(map.clone()).to_string(),
            Content::Binary(message) => String::from_utf8_lossy(&message.body).into_owned(),
        }
    }

    fn number_field(&self, field: &str) -> Option<u32> {
        match &self.content {
            Content::Json(map) => map.get(field).and_then(value_as_u32),
            Content::Binary(message) => match field {
                SEQ_FIELD => message.seq,
                ACK_FIELD => message.ack,
                _ => None,
            },
        }
    }
}

fn value_as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Echo {
        message: String,
    }

    #[test]
    fn test_json_roundtrip_with_reserved_fields() {
        let mut message = Message::from_json_str(Some("echo"), r#"{"message":"hello"}"#).unwrap();
        let mut next = 7;
        message.assign_seq(&mut next);
        message.set_session_id(&SessionId::from_text("abc"));

        let bytes = message.serialize().unwrap();
        let mut decoded = Message::decode(Encoding::Json, &bytes).unwrap();
        assert_eq!(decoded.msg_type(), Some(MessageType::from("echo")));
        assert_eq!(decoded.session_id().unwrap().as_text(), "abc");
        assert_eq!(decoded.take_seq(), Some(7));
        assert_eq!(decoded.seq_field(), None);
        assert_eq!(decoded.payload::<Echo>().unwrap().message, "hello");
    }

    #[test]
    fn test_seq_assigned_once() {
        let mut message = Message::from_json_str(Some("echo"), "{}").unwrap();
        let mut next = u32::MAX;
        assert_eq!(message.assign_seq(&mut next), u32::MAX);
        assert_eq!(next, 0);
        // Re-encoding reuses the sequence number.
        assert_eq!(message.assign_seq(&mut next), u32::MAX);
        assert_eq!(next, 0);
        assert_eq!(message.seq_field(), Some(u32::MAX));
    }

    #[test]
    fn test_binary_message_types() {
        let named = Message::binary("login", b"payload".to_vec());
        assert_eq!(named.msg_type(), Some(MessageType::from("login")));

        let coded = Message::binary(42, Vec::new());
        assert_eq!(coded.msg_type(), Some(MessageType::Code(42)));

        let bytes = coded.serialize().unwrap();
        let decoded = Message::decode(Encoding::Binary, &bytes).unwrap();
        assert_eq!(decoded.msg_type(), Some(MessageType::Code(42)));
        assert!(Message::empty(Encoding::Binary).msg_type().is_none());
    }

    #[test]
    fn test_ack_only() {
        let mut json = Message::ack_only(Encoding::Json, 11);
        assert_eq!(json.ack(), Some(11));
        assert!(json.msg_type().is_none());
        assert_eq!(json.take_ack(), Some(11));
        assert_eq!(json.ack(), None);

        let binary = Message::ack_only(Encoding::Binary, 3);
        let decoded = Message::decode(Encoding::Binary, &binary.serialize().unwrap()).unwrap();
        assert_eq!(decoded.ack(), Some(3));
    }

    #[test]
    fn test_payload_both_encodings() {
        let echo = Echo {
            message: "hi".into(),
        };
        for encoding in [Encoding::Json, Encoding::Binary] {
            let message = Message::with_payload(encoding, "echo", &echo).unwrap();
            let bytes = message.serialize().unwrap();
            let decoded = Message::decode(encoding, &bytes).unwrap();
            assert_eq!(decoded.payload::<Echo>().unwrap(), echo);
            assert_eq!(decoded.msg_type(), Some(MessageType::from("echo")));
        }
    }

    #[test]
    fn test_invalid_bodies() {
        assert!(Message::decode(Encoding::Json, b"[1,2]").is_err());
        assert!(Message::decode(Encoding::Json, b"not json").is_err());
        assert!(Message::from_json_str(None, "42").is_err());
    }

    #[test]
    fn test_binary_session_id_uses_raw_bytes() {
        let sid = SessionId::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let mut message = Message::empty(Encoding::Binary);
        message.set_session_id(&sid);
        assert_eq!(message.as_binary().unwrap().sid.as_deref(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        assert_eq!(message.session_id().unwrap(), sid);
    }
}
