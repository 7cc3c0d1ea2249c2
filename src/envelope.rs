//! Relay wire envelopes
//!
//! Every frame is a JSON object with a `type` discriminator.
//!
//! ## Client Envelopes
//! - `register`: Bind the connection to a phone number
//! - `fcm_register`: Attach a push token to a phone number
//! - `message`: Send a chat message to another phone number
//!
//! ## Server Envelopes
//! - `info`: Operation succeeded
//! - `error`: Operation failed, connection stays open
//! - `reply`: Outcome of a `message` send, to the sender
//! - `message`: Incoming chat, to the recipient

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-to-server envelopes
///
/// Required fields are optional at the decode level so that a missing
/// field surfaces as a validation error rather than a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Register {
        #[serde(default)]
        phone: Option<String>,
    },
    FcmRegister {
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        token: Option<String>,
    },
    Message {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Server-to-client envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Info { text: String },
    Error { text: String },
    Reply { text: String },
    /// Incoming chat, serialized as `type: "message"`
    #[serde(rename = "message")]
    IncomingChat { from: String, text: String },
}

impl ServerMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Info { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply { text: text.into() }
    }

    /// Check if this is an `error` envelope
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Decode a client envelope from raw bytes
///
/// Anything that is not a JSON object is `InvalidFormat`. An object without
/// a string `type`, or with a `type` we do not know, is `UnknownType`.
pub fn decode(data: &[u8]) -> Result<ClientEnvelope, EnvelopeError> {
    let value: Value = serde_json::from_slice(data).map_err(EnvelopeError::InvalidFormat)?;

    let Some(object) = value.as_object() else {
        return Err(EnvelopeError::NotAnObject);
    };

    if !object.get("type").is_some_and(Value::is_string) {
        return Err(EnvelopeError::UnknownType);
    }

    match serde_json::from_value(value).map_err(EnvelopeError::InvalidFormat)? {
        ClientEnvelope::Unknown => Err(EnvelopeError::UnknownType),
        envelope => Ok(envelope),
    }
}

/// Encode a server envelope as a JSON string
pub fn encode(msg: &ServerMessage) -> Result<String, EnvelopeError> {
    serde_json::to_string(msg).map_err(EnvelopeError::Encode)
}

/// Treat empty strings like absent fields
pub fn required(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

/// Envelope errors
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid format: {0}")]
    InvalidFormat(#[source] serde_json::Error),
    #[error("invalid format: expected a JSON object")]
    NotAnObject,
    #[error("unknown message type")]
    UnknownType,
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EnvelopeError {
    /// Text reported back to the client
    pub fn client_text(&self) -> &'static str {
        match self {
            Self::UnknownType => "unknown message type",
            Self::InvalidFormat(_) | Self::NotAnObject | Self::Encode(_) => "invalid format",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register() {
        let env = decode(br#"{"type":"register","phone":"+33600000000"}"#).unwrap();
        assert_eq!(
            env,
            ClientEnvelope::Register {
                phone: Some("+33600000000".to_string())
            }
        );
    }

    #[test]
    fn test_decode_register_missing_phone() {
        let env = decode(br#"{"type":"register"}"#).unwrap();
        assert_eq!(env, ClientEnvelope::Register { phone: None });
    }

    #[test]
    fn test_decode_fcm_register() {
        let env = decode(br#"{"type":"fcm_register","phone":"A","token":"tok"}"#).unwrap();
        match env {
            ClientEnvelope::FcmRegister { phone, token } => {
                assert_eq!(phone.as_deref(), Some("A"));
                assert_eq!(token.as_deref(), Some("tok"));
            }
            _ => panic!("expected FcmRegister"),
        }
    }

    #[test]
    fn test_decode_message_ignores_extra_fields() {
        let env =
            decode(br#"{"type":"message","from":"A","to":"B","text":"hi","sent_at":12}"#).unwrap();
        match env {
            ClientEnvelope::Message { from, to, text } => {
                assert_eq!(from.as_deref(), Some("A"));
                assert_eq!(to.as_deref(), Some("B"));
                assert_eq!(text.as_deref(), Some("hi"));
            }
            _ => panic!("expected Message"),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(br#"{"type":"typing","from":"A"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownType));
        assert_eq!(err.client_text(), "unknown message type");
    }

    #[test]
    fn test_decode_missing_type() {
        let err = decode(br#"{"phone":"A"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownType));
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = decode(b"{not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidFormat(_)));
        assert_eq!(err.client_text(), "invalid format");
    }

    #[test]
    fn test_decode_non_object() {
        let err = decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, EnvelopeError::NotAnObject));
        assert_eq!(err.client_text(), "invalid format");
    }

    #[test]
    fn test_decode_wrong_field_type() {
        let err = decode(br#"{"type":"register","phone":42}"#).unwrap_err();
        assert_eq!(err.client_text(), "invalid format");
    }

    #[test]
    fn test_required_rejects_empty() {
        assert_eq!(required(Some(String::new())), None);
        assert_eq!(required(None), None);
        assert_eq!(required(Some("A".to_string())).as_deref(), Some("A"));
    }

    #[test]
    fn test_encode_incoming_chat() {
        let msg = ServerMessage::IncomingChat {
            from: "A".to_string(),
            text: "hi".to_string(),
        };
        let json: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["from"], "A");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn test_encode_error() {
        let json: Value =
            serde_json::from_str(&encode(&ServerMessage::error("missing fields")).unwrap())
                .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["text"], "missing fields");
    }
}
