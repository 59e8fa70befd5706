//! Feed messages: canonical encoding, hashing and signatures.
//!
//! A message value is a JSON object whose field order matters: both the key
//! and the signature are computed over its canonical text, which is the
//! value printed with two-space indentation and fields in insertion order.
//! `serde_json`'s `preserve_order` keeps the order a remote sent us.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::crypto::{sha256, KeyError, PublicKey, SecretKey, Signature, SIGNATURE_SIZE};
use crate::ids::{FeedId, MsgKey};

/// Only hash algorithm messages are published with
pub const HASH_ALGORITHM: &str = "sha256";
const SIGNATURE_SUFFIX: &str = ".sig.ed25519";

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message key does not match its value")]
    KeyMismatch,
    #[error("message signature is invalid")]
    InvalidSignature,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

/// Text form both hashing and signing operate on
pub fn canonical_json(value: &Value) -> Result<String, MessageError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| MessageError::Encode(e.to_string()))?;
    String::from_utf8(out).map_err(|e| MessageError::Encode(e.to_string()))
}

/// Hash of a value as the network computes it: every UTF-16 code unit of
/// the canonical text is truncated to a single byte before hashing
pub fn compute_key(value: &Value) -> Result<MsgKey, MessageError> {
    let text = canonical_json(value)?;
    let bytes: Vec<u8> = text.encode_utf16().map(|unit| unit as u8).collect();
    Ok(MsgKey::from_bytes(sha256(&[&bytes])))
}

fn without_signature(value: &Value) -> Result<Value, MessageError> {
    let obj = value
        .as_object()
        .ok_or_else(|| MessageError::Malformed("value is not an object".to_string()))?;
    let stripped: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "signature")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(Value::Object(stripped))
}

pub fn encode_signature(signature: &Signature) -> String {
    format!("{}{}", STANDARD.encode(signature.to_bytes()), SIGNATURE_SUFFIX)
}

pub fn decode_signature(text: &str) -> Result<Signature, MessageError> {
    let b64 = text
        .strip_suffix(SIGNATURE_SUFFIX)
        .ok_or_else(|| MessageError::Malformed("signature has no .sig.ed25519 suffix".to_string()))?;
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| MessageError::Malformed(format!("signature base64: {}", e)))?;
    let bytes: [u8; SIGNATURE_SIZE] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| MessageError::Malformed(format!("signature is {} bytes", bytes.len())))?;
    Ok(Signature::from_bytes(&bytes))
}

/// The fields of a value in publishing order, before the signature is added
#[derive(Serialize)]
struct UnsignedValue<'a> {
    previous: Option<MsgKey>,
    author: FeedId,
    sequence: u64,
    timestamp: i64,
    hash: &'static str,
    content: &'a Value,
}

/// A stored or received message: its key, its value, and when we got it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: MsgKey,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Number>,
}

impl Message {
    /// Wrap a bare value, computing its key
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let key = compute_key(&value)?;
        Ok(Self {
            key,
            value,
            timestamp: None,
        })
    }

    /// Build and sign the message that follows `previous` in `secret`'s feed
    pub fn create(
        secret: &SecretKey,
        previous: Option<&Message>,
        content: &Value,
        timestamp: i64,
    ) -> Result<Self, MessageError> {
        let author = FeedId::from(secret.public());
        let (previous_key, sequence) = match previous {
            Some(prev) => {
                if prev.author()? != author {
                    return Err(MessageError::Malformed(
                        "previous message belongs to another feed".to_string(),
                    ));
                }
                (Some(prev.key), prev.sequence()? + 1)
            }
            None => (None, 1),
        };

        let unsigned = serde_json::to_value(UnsignedValue {
            previous: previous_key,
            author,
            sequence,
            timestamp,
            hash: HASH_ALGORITHM,
            content,
        })
        .map_err(|e| MessageError::Encode(e.to_string()))?;

        let signature = secret.sign(canonical_json(&unsigned)?.as_bytes());
        let mut value = unsigned;
        if let Value::Object(map) = &mut value {
            map.insert(
                "signature".to_string(),
                Value::String(encode_signature(&signature)),
            );
        }

        let mut message = Self::from_value(value)?;
        message.timestamp = Some(Number::from(timestamp));
        Ok(message)
    }

    fn field(&self, name: &str) -> Result<&Value, MessageError> {
        self.value
            .get(name)
            .ok_or_else(|| MessageError::Malformed(format!("missing field {}", name)))
    }

    pub fn author(&self) -> Result<FeedId, MessageError> {
        self.field("author")?
            .as_str()
            .ok_or_else(|| MessageError::Malformed("author is not a string".to_string()))?
            .parse()
            .map_err(|e| MessageError::Malformed(format!("author: {}", e)))
    }

    pub fn sequence(&self) -> Result<u64, MessageError> {
        self.field("sequence")?
            .as_u64()
            .filter(|seq| *seq >= 1)
            .ok_or_else(|| MessageError::Malformed("sequence is not a positive integer".to_string()))
    }

    pub fn previous(&self) -> Result<Option<MsgKey>, MessageError> {
        match self.value.get("previous") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => text
                .parse()
                .map(Some)
                .map_err(|e| MessageError::Malformed(format!("previous: {}", e))),
            Some(_) => Err(MessageError::Malformed(
                "previous is not a string".to_string(),
            )),
        }
    }

    pub fn content(&self) -> Option<&Value> {
        self.value.get("content")
    }

    /// Whether `key` is the hash of `value`
    pub fn check_key(&self) -> Result<(), MessageError> {
        if compute_key(&self.value)? == self.key {
            Ok(())
        } else {
            Err(MessageError::KeyMismatch)
        }
    }

    /// Check the author's signature over the value minus its signature
    pub fn verify_signature(&self) -> Result<(), MessageError> {
        let signature = self
            .field("signature")?
            .as_str()
            .ok_or_else(|| MessageError::Malformed("signature is not a string".to_string()))
            .and_then(decode_signature)?;
        let author: PublicKey = self.author()?.into();
        let signed = canonical_json(&without_signature(&self.value)?)?;
        author
            .verify(signed.as_bytes(), &signature)
            .map_err(|_| MessageError::InvalidSignature)
    }

    /// The `{key, value, timestamp}` form sent on history streams
    pub fn to_keyed_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("key".to_string(), Value::String(self.key.to_string()));
        map.insert("value".to_string(), self.value.clone());
        if let Some(ts) = &self.timestamp {
            map.insert("timestamp".to_string(), Value::Number(ts.clone()));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_matches_two_space_pretty_print() {
        let value = json!({"b": 1, "a": [1, 2], "c": {}, "d": []});
        let text = canonical_json(&value).unwrap();
        assert_eq!(
            text,
            "{\n  \"b\": 1,\n  \"a\": [\n    1,\n    2\n  ],\n  \"c\": {},\n  \"d\": []\n}"
        );
    }

    #[test]
    fn test_created_messages_chain_and_verify() {
        let secret = SecretKey::generate().unwrap();
        let first = Message::create(&secret, None, &json!({"type": "test", "value": 42}), 1000)
            .unwrap();
        assert_eq!(first.sequence().unwrap(), 1);
        assert_eq!(first.previous().unwrap(), None);
        assert_eq!(first.author().unwrap(), FeedId::from(secret.public()));
        first.check_key().unwrap();
        first.verify_signature().unwrap();

        let second = Message::create(&secret, Some(&first), &json!({"type": "test"}), 2000).unwrap();
        assert_eq!(second.sequence().unwrap(), 2);
        assert_eq!(second.previous().unwrap(), Some(first.key));
        second.verify_signature().unwrap();

        let fields: Vec<&str> = second
            .value
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        assert_eq!(
            fields,
            ["previous", "author", "sequence", "timestamp", "hash", "content", "signature"]
        );
    }

    #[test]
    fn test_tampered_content_detected() {
        let secret = SecretKey::generate().unwrap();
        let mut msg =
            Message::create(&secret, None, &json!({"type": "test", "value": 42}), 1).unwrap();
        msg.value["content"]["value"] = json!(43);
        assert!(matches!(msg.check_key(), Err(MessageError::KeyMismatch)));
        assert!(matches!(
            msg.verify_signature(),
            Err(MessageError::InvalidSignature)
        ));
    }

    #[test]
    fn test_key_hashes_utf16_units_as_bytes() {
        // 'é' is one UTF-16 unit (0xe9); hashed as the single byte 0xe9
        let value = json!({"x": "é"});
        let text = canonical_json(&value).unwrap();
        let latin1: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        assert_eq!(
            compute_key(&value).unwrap(),
            MsgKey::from_bytes(sha256(&[&latin1]))
        );
    }

    #[test]
    fn test_keyed_json_round_trip() {
        let secret = SecretKey::generate().unwrap();
        let msg = Message::create(&secret, None, &json!({"type": "post"}), 5).unwrap();
        let keyed = msg.to_keyed_json();
        let parsed: Message = serde_json::from_value(keyed).unwrap();
        assert_eq!(parsed, msg);
    }
}
