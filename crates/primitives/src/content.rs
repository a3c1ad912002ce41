//! Content addressing and selector types.

use std::fmt::{self, Debug, Display, Formatter};

use alloy_primitives::B256;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A 32-byte content-addressed block identifier.
///
/// The coordinator never interprets block contents; it only tracks which
/// blocks have been received so a restarted transfer can skip them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(pub B256);

impl ContentId {
    /// Creates a new ContentId from raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(B256::new(bytes))
    }

    /// Returns the underlying bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl From<B256> for ContentId {
    fn from(b: B256) -> Self {
        Self(b)
    }
}

impl Debug for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", hex::encode(&self.0 .0[..4]))
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0 .0))
    }
}

impl std::str::FromStr for ContentId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self::new(arr))
    }
}

/// Opaque description of which subgraph of a content-addressed graph to
/// transfer.
///
/// The coordinator carries selectors between peers and hands them to the
/// transport; it never evaluates them.
#[derive(Clone, PartialEq, Eq)]
pub struct Selector(pub Bytes);

impl Selector {
    /// Creates a selector from raw encoded bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The selector matching the entire graph under the root.
    pub fn all() -> Self {
        Self(Bytes::from_static(b"*"))
    }

    /// Returns the encoded selector bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({} bytes)", self.0.len())
    }
}

impl Serialize for Selector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Ok(Self(Bytes::from(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_hex_roundtrip() {
        let cid = ContentId::new([7u8; 32]);
        let parsed: ContentId = cid.to_string().parse().unwrap();
        assert_eq!(parsed, cid);
    }

    #[test]
    fn selector_serde_roundtrip() {
        let sel = Selector::new(vec![1, 2, 3, 4]);
        let json = serde_json::to_string(&sel).unwrap();
        let back: Selector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sel);
    }
}
