//! Opaque typed payloads.
//!
//! Vouchers and voucher results are carried as `(type identifier, bytes)`
//! pairs. The coordinator checks type identity by string equality and leaves
//! payload interpretation to registered decoders and validators, so no
//! reflection or downcasting is needed anywhere in the core.

use std::fmt::{self, Debug, Display, Formatter};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::serde_hex;

/// Identifier of a voucher or voucher-result type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIdentifier(pub String);

impl TypeIdentifier {
    /// Creates a type identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns true if the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for TypeIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for TypeIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIdentifier({})", self.0)
    }
}

/// An opaque typed payload: a voucher or a voucher result.
///
/// The payload bytes are only ever interpreted by the decoder and
/// validator registered for `type_id`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedPayload {
    /// Registered type of the payload.
    pub type_id: TypeIdentifier,
    /// Encoded payload bytes.
    #[serde(with = "serde_hex")]
    pub payload: Bytes,
}

impl TypedPayload {
    /// Creates a typed payload.
    pub fn new(type_id: impl Into<TypeIdentifier>, payload: impl Into<Bytes>) -> Self {
        Self {
            type_id: type_id.into(),
            payload: payload.into(),
        }
    }
}

impl From<String> for TypeIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Debug for TypedPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TypedPayload({}, {} bytes)",
            self.type_id,
            self.payload.len()
        )
    }
}

/// A voucher: application-supplied authorization for a transfer.
pub type Voucher = TypedPayload;

/// A voucher result: the validator's typed response to a voucher.
pub type VoucherResult = TypedPayload;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serde_roundtrip() {
        let v = TypedPayload::new("test/voucher", vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&v).unwrap();
        let back: TypedPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
