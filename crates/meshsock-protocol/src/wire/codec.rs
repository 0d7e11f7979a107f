//! Parse/serialize between WebSocket frames and [`Envelope`]s.

use meshsock_crypto::Encryption;
use serde_json::Value;

use super::{Envelope, EnvelopeType};
use crate::error::{ProtocolError, Result};

/// A raw frame as read from or written to the transport.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

/// Stateless parse/serialize between wire frames and [`Envelope`]s.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Parse an inbound frame into an [`Envelope`].
    ///
    /// Binary frames pass through verbatim with no decryption or JSON
    /// parsing attempted. Text frames are decrypted (if `encryption` is
    /// given and enabled), then JSON-parsed; a frame that looks like
    /// ciphertext but fails to decrypt surfaces as an error envelope, and
    /// one that decrypts (or was never encrypted) but fails JSON parsing
    /// surfaces as an `encrypted` event carrying the raw text — this lets
    /// a peer without the key still observe that traffic occurred.
    pub fn parse(frame: Frame, encryption: Option<&Encryption>) -> Envelope {
        let text = match frame {
            Frame::Binary(bytes) => return Envelope::binary(bytes),
            Frame::Text(text) => text,
        };

        let candidate = match encryption {
            Some(enc) if enc.is_enabled() => match enc.decrypt(&text) {
                Ok(plain) => plain,
                Err(_) => {
                    if Encryption::is_likely_ciphertext(&text) {
                        return Envelope::error("decryption failed");
                    }
                    text
                }
            },
            _ => text,
        };

        match serde_json::from_str::<Envelope>(&candidate) {
            Ok(envelope) => envelope,
            Err(_) => Envelope::event("encrypted", Value::String(candidate)),
        }
    }

    /// Serialize an [`Envelope`] for the wire: JSON-encode, then encrypt
    /// if `encryption` is given and enabled.
    ///
    /// Binary envelopes must never reach this function; callers hand
    /// binary payloads to the transport directly.
    pub fn serialize(envelope: &Envelope, encryption: Option<&mut Encryption>) -> Result<String> {
        if envelope.kind == EnvelopeType::Binary {
            return Err(ProtocolError::InvalidMessage(
                "binary envelopes cannot be serialized through the text codec".into(),
            ));
        }

        let json = serde_json::to_string(envelope).map_err(|e| ProtocolError::EncodingError(e.to_string()))?;

        match encryption {
            Some(enc) if enc.is_enabled() => Ok(enc.encrypt(&json)?),
            _ => Ok(json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn enabled_encryption() -> Encryption {
        meshsock_crypto::Encryption::new(meshsock_crypto::EncryptionConfig {
            key: vec![0u8; 32],
            algorithm: None,
            enabled: true,
            cache_size: 100,
            cache_ttl: Duration::from_secs(60),
        })
        .unwrap()
    }

    #[test]
    fn parse_binary_passes_through() {
        let env = MessageCodec::parse(Frame::Binary(vec![1, 2, 3]), None);
        assert_eq!(env.kind, EnvelopeType::Binary);
    }

    #[test]
    fn parse_plain_json_event() {
        let frame = Frame::Text(r#"{"type":"event","event":"chat","data":{"msg":"hi"}}"#.to_string());
        let env = MessageCodec::parse(frame, None);
        assert_eq!(env.kind, EnvelopeType::Event);
        assert_eq!(env.event.as_deref(), Some("chat"));
    }

    #[test]
    fn parse_non_json_text_surfaces_as_encrypted_event() {
        let env = MessageCodec::parse(Frame::Text("not json at all".to_string()), None);
        assert_eq!(env.kind, EnvelopeType::Event);
        assert_eq!(env.event.as_deref(), Some("encrypted"));
        assert_eq!(env.data, Some(Value::String("not json at all".to_string())));
    }

    #[test]
    fn serialize_rejects_binary_envelope() {
        let env = Envelope::binary(vec![1, 2, 3]);
        assert!(MessageCodec::serialize(&env, None).is_err());
    }

    #[test]
    fn serialize_then_parse_roundtrips_plaintext() {
        let env = Envelope::event("chat", serde_json::json!({"msg": "hi"}));
        let wire = MessageCodec::serialize(&env, None).unwrap();
        let back = MessageCodec::parse(Frame::Text(wire), None);
        assert_eq!(back, env);
    }

    #[test]
    fn serialize_then_parse_roundtrips_encrypted() {
        let mut enc = enabled_encryption();
        let env = Envelope::event("chat", serde_json::json!({"msg": "secret"}));
        let wire = MessageCodec::serialize(&env, Some(&mut enc)).unwrap();
        assert_ne!(wire, serde_json::to_string(&env).unwrap());

        let back = MessageCodec::parse(Frame::Text(wire), Some(&enc));
        assert_eq!(back, env);
    }

    #[test]
    fn undecryptable_ciphertext_like_text_surfaces_as_error() {
        let enc = enabled_encryption();
        // Valid base64 decoding to well over 20 bytes, but not a ciphertext
        // this key can authenticate.
        let garbage = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [7u8; 40]);
        let env = MessageCodec::parse(Frame::Text(garbage), Some(&enc));
        assert_eq!(env.kind, EnvelopeType::Error);
    }
}
