use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::header::BodyType;
use super::RpcError;

/// Payload of one rpc frame.
///
/// The wire body type follows from the variant, so callers never set it by
/// hand unless they build a variant explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Binary(Vec<u8>),
    Utf8(String),
    Json(Value),
}

impl Body {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, RpcError> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| RpcError::Encode(e.to_string()))
    }

    pub fn body_type(&self) -> BodyType {
        match self {
            Body::Binary(_) => BodyType::Binary,
            Body::Utf8(_) => BodyType::Utf8,
            Body::Json(_) => BodyType::Json,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RpcError> {
        match self {
            Body::Binary(bytes) => Ok(bytes.clone()),
            Body::Utf8(text) => Ok(text.as_bytes().to_vec()),
            Body::Json(value) => {
                serde_json::to_vec(value).map_err(|e| RpcError::Encode(e.to_string()))
            }
        }
    }

    pub fn decode(body_type: BodyType, bytes: Vec<u8>) -> Result<Self, RpcError> {
        match body_type {
            BodyType::Binary => Ok(Body::Binary(bytes)),
            BodyType::Utf8 => String::from_utf8(bytes)
                .map(Body::Utf8)
                .map_err(|e| RpcError::Framing(format!("invalid utf8 body: {}", e))),
            BodyType::Json => serde_json::from_slice(&bytes)
                .map(Body::Json)
                .map_err(|e| RpcError::Framing(format!("invalid json body: {}", e))),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserialize a json body into `T`
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        match self {
            Body::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| RpcError::Framing(format!("unexpected json body: {}", e))),
            other => Err(RpcError::Framing(format!(
                "expected a json body, got {:?}",
                other.body_type()
            ))),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, RpcError> {
        match self {
            Body::Binary(bytes) => Ok(bytes),
            Body::Utf8(text) => Ok(text.into_bytes()),
            json => json.to_bytes(),
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Utf8(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Utf8(text.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Binary(bytes)
    }
}

impl From<bool> for Body {
    fn from(flag: bool) -> Self {
        Body::Json(Value::Bool(flag))
    }
}
