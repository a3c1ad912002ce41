//! Base58 serde for [`PeerId`].
//!
//! `PeerId` has no serde implementation of its own; channel records persist
//! peer ids in their canonical base58 string form.

use std::str::FromStr;

use libp2p_identity::PeerId;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a peer id as its base58 string.
pub fn serialize<S>(peer: &PeerId, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&peer.to_base58())
}

/// Deserialize a peer id from its base58 string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<PeerId, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    PeerId::from_str(&s).map_err(serde::de::Error::custom)
}
