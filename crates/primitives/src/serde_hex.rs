//! Hex-string serde for opaque byte payloads.
//!
//! Keeps persisted records and wire-agnostic encodings human-readable
//! instead of serializing `Bytes` as an integer array.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize bytes as a hex string.
pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex::encode(bytes))
}

/// Deserialize bytes from a hex string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
    Ok(Bytes::from(bytes))
}
