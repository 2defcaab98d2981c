//! Types shared between the handle vault, the oracle and ledger hosts.

use crate::constants::HANDLE_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid ciphertext handle: {0}")]
    InvalidHandle(String),

    #[error("invalid request id: {0}")]
    InvalidRequestId(String),

    #[error("malformed cleartext: {0}")]
    Malformed(String),
}

/// Opaque reference to an encrypted value held by the FHE coprocessor.
///
/// The handle is all a ledger ever stores; the value behind it is only reachable through the
/// decryption oracle. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CiphertextHandle([u8; HANDLE_LEN]);

impl CiphertextHandle {
    pub fn from_bytes(bytes: [u8; HANDLE_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh handle with 256 bits of entropy.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Serialize-for-decryption: the byte form an oracle request carries.
    pub fn as_bytes(&self) -> &[u8; HANDLE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s).map_err(|e| CodecError::InvalidHandle(format!("{e}")))?;
        let bytes: [u8; HANDLE_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CodecError::InvalidHandle(format!("expected {HANDLE_LEN} bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({})", self.to_hex())
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for CiphertextHandle {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<CiphertextHandle> for String {
    fn from(value: CiphertextHandle) -> Self {
        value.to_hex()
    }
}

/// Identifier the oracle assigns to one decryption request.
///
/// Uniqueness is the oracle's responsibility; ledgers only ever compare ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CodecError::InvalidRequestId(format!("{e}")))
    }
}

/// A decrypted value as carried inside oracle cleartext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Plaintext {
    Uint(u64),
    Text(String),
}

impl Plaintext {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Plaintext::Uint(v) => Some(*v),
            Plaintext::Text(_) => None,
        }
    }
}

/// Encode decrypted values in request order.
///
/// Wire format is a JSON array of tagged values, e.g. `[{"type":"text","value":"Theft"}]`.
pub fn encode_cleartext(values: &[Plaintext]) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(values).map_err(|e| CodecError::Malformed(format!("{e}")))
}

pub fn decode_cleartext(bytes: &[u8]) -> Result<Vec<Plaintext>, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_hex_is_stable_through_json() {
        let handle = CiphertextHandle::from_bytes([0xab; HANDLE_LEN]);
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(HANDLE_LEN)));
        let back: CiphertextHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);
    }

    #[test]
    fn short_handle_is_rejected() {
        let err = CiphertextHandle::from_hex("abcd").unwrap_err();
        assert!(matches!(err, CodecError::InvalidHandle(_)));
    }

    #[test]
    fn cleartext_wire_format_is_tagged_json() {
        let bytes = encode_cleartext(&[Plaintext::Text("Theft".into()), Plaintext::Uint(10)]).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"[{"type":"text","value":"Theft"},{"type":"uint","value":10}]"#
        );
    }

    #[test]
    fn garbage_cleartext_is_malformed() {
        assert!(matches!(decode_cleartext(b"\x00\x01"), Err(CodecError::Malformed(_))));
        assert!(matches!(
            decode_cleartext(br#"[{"type":"float","value":1.5}]"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn request_id_parses_its_display_form() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<RequestId>().is_err());
    }
}
