use super::RpcError;

/// Size of an encoded rpc header
pub const HEADER_SIZE: usize = 9;

const FLAG_STREAM: u8 = 0b1000;
const FLAG_END_OR_ERROR: u8 = 0b0100;
const BODY_TYPE_MASK: u8 = 0b0011;

/// Encoding of an rpc body, carried in the low two flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Binary,
    Utf8,
    Json,
}

impl BodyType {
    fn bits(self) -> u8 {
        match self {
            BodyType::Binary => 0,
            BodyType::Utf8 => 1,
            BodyType::Json => 2,
        }
    }

    fn from_bits(bits: u8) -> Result<Self, RpcError> {
        match bits & BODY_TYPE_MASK {
            0 => Ok(BodyType::Binary),
            1 => Ok(BodyType::Utf8),
            2 => Ok(BodyType::Json),
            other => Err(RpcError::Framing(format!("unknown body type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub stream: bool,
    pub end_or_error: bool,
    pub body_type: BodyType,
    pub body_len: u32,
    pub request_number: i32,
}

impl RpcHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut flags = self.body_type.bits();
        if self.stream {
            flags |= FLAG_STREAM;
        }
        if self.end_or_error {
            flags |= FLAG_END_OR_ERROR;
        }

        let mut out = [0u8; HEADER_SIZE];
        out[0] = flags;
        out[1..5].copy_from_slice(&self.body_len.to_be_bytes());
        out[5..9].copy_from_slice(&self.request_number.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, RpcError> {
        let flags = bytes[0];
        let body_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let request_number = i32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Ok(Self {
            stream: flags & FLAG_STREAM != 0,
            end_or_error: flags & FLAG_END_OR_ERROR != 0,
            body_type: BodyType::from_bits(flags)?,
            body_len,
            request_number,
        })
    }

    /// The all-zero header some peers send before hanging up
    pub fn is_goodbye(bytes: &[u8; HEADER_SIZE]) -> bool {
        bytes.iter().all(|b| *b == 0)
    }
}
