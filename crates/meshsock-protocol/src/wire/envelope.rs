//! The wire unit carried on a text frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `type` discriminant of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// A named event with a JSON payload.
    Event,
    /// Heartbeat ping.
    Ping,
    /// Heartbeat pong.
    Pong,
    /// Reply correlated to an earlier request via `callback_id`.
    Callback,
    /// A raw binary frame. Never appears on the wire as JSON; produced
    /// only by [`crate::wire::MessageCodec::parse`] to represent a
    /// binary frame uniformly alongside text-derived envelopes.
    Binary,
    /// A codec-level error (e.g. decryption failure).
    Error,
}

/// The wire unit on a text frame: `{type, event?, data?, callbackId?}`.
///
/// Binary frames carry no envelope on the wire; [`EnvelopeType::Binary`]
/// exists only so callers have one type to match on regardless of frame
/// kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "callbackId")]
    pub callback_id: Option<String>,
}

impl Envelope {
    /// A named event envelope, optionally carrying a callback id to
    /// correlate a reply.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EnvelopeType::Event,
            event: Some(event.into()),
            data: Some(data),
            callback_id: None,
        }
    }

    /// A named event envelope that expects a correlated reply.
    pub fn event_with_callback(event: impl Into<String>, data: Value, callback_id: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeType::Event,
            event: Some(event.into()),
            data: Some(data),
            callback_id: Some(callback_id.into()),
        }
    }

    /// A reply to a request, correlated by `callback_id`.
    pub fn callback(callback_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EnvelopeType::Callback,
            event: None,
            data: Some(data),
            callback_id: Some(callback_id.into()),
        }
    }

    /// A heartbeat ping envelope.
    pub fn ping() -> Self {
        Self {
            kind: EnvelopeType::Ping,
            event: None,
            data: None,
            callback_id: None,
        }
    }

    /// A heartbeat pong envelope.
    pub fn pong() -> Self {
        Self {
            kind: EnvelopeType::Pong,
            event: None,
            data: None,
            callback_id: None,
        }
    }

    /// A codec-level error envelope carrying a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeType::Error,
            event: None,
            data: Some(Value::String(message.into())),
            callback_id: None,
        }
    }

    /// A binary-frame envelope. Only produced by [`crate::wire::MessageCodec::parse`].
    pub fn binary(bytes: Vec<u8>) -> Self {
        Self {
            kind: EnvelopeType::Binary,
            event: None,
            data: Some(Value::Array(
                bytes.into_iter().map(|b| Value::Number(b.into())).collect(),
            )),
            callback_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_lowercase_type() {
        let env = Envelope::event("chat", serde_json::json!({"msg": "hi"}));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"event\":\"chat\""));
        assert!(!json.contains("callbackId"));
    }

    #[test]
    fn ping_omits_absent_fields() {
        let json = serde_json::to_string(&Envelope::ping()).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn callback_roundtrips() {
        let env = Envelope::callback("cb-1", serde_json::json!(42));
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn event_with_callback_roundtrips() {
        let env = Envelope::event_with_callback("ack", serde_json::json!(null), "cb-7");
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.callback_id.as_deref(), Some("cb-7"));
    }
}
