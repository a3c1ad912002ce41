//! Channel and transfer identity types.
//!
//! A [`ChannelId`] is the globally unique key of a single transfer: the
//! initiating peer, the responding peer, and a [`TransferId`] allocated from
//! the initiator's persisted counter. Both peers derive the same triple.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};

use crate::serde_peer_id;

/// Monotonically increasing transfer identifier, unique at the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl TransferId {
    /// Returns the raw counter value.
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TransferId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique identifier of a data-transfer channel.
///
/// The triple `(initiator, responder, id)` is derived identically on both
/// peers: the initiator allocates `id`, the responder learns it from the
/// opening request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    /// The peer that created the channel.
    #[serde(with = "serde_peer_id")]
    pub initiator: PeerId,
    /// The peer that received the opening request.
    #[serde(with = "serde_peer_id")]
    pub responder: PeerId,
    /// Transfer counter value allocated by the initiator.
    pub id: TransferId,
}

impl ChannelId {
    /// Create a channel id from its parts.
    pub fn new(initiator: PeerId, responder: PeerId, id: TransferId) -> Self {
        Self {
            initiator,
            responder,
            id,
        }
    }

    /// Returns the counterparty of `local`, i.e. whichever end of the
    /// channel `local` is not.
    pub fn other_party(&self, local: PeerId) -> PeerId {
        if self.initiator == local {
            self.responder
        } else {
            self.initiator
        }
    }
}

impl Display for ChannelId {
    /// `initiator-responder-id`, base58 peer ids. This is the store key and
    /// the connection protection tag, so it must stay parseable by
    /// [`ChannelId::from_str`].
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.initiator, self.responder, self.id)
    }
}

/// Error parsing a [`ChannelId`] from its string form.
#[derive(Debug, thiserror::Error)]
pub enum ParseChannelIdError {
    /// The string did not have three `-`-separated parts.
    #[error("malformed channel id: {0}")]
    Malformed(String),
    /// A peer id part failed to parse.
    #[error("invalid peer id in channel id: {0}")]
    PeerId(String),
    /// The transfer id part failed to parse.
    #[error("invalid transfer id in channel id: {0}")]
    TransferId(String),
}

impl FromStr for ChannelId {
    type Err = ParseChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let (initiator, responder, id) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(i), Some(r), Some(t), None) => (i, r, t),
            _ => return Err(ParseChannelIdError::Malformed(s.to_string())),
        };
        let initiator = PeerId::from_str(initiator)
            .map_err(|_| ParseChannelIdError::PeerId(initiator.to_string()))?;
        let responder = PeerId::from_str(responder)
            .map_err(|_| ParseChannelIdError::PeerId(responder.to_string()))?;
        let id = id
            .parse::<u64>()
            .map_err(|_| ParseChannelIdError::TransferId(id.to_string()))?;
        Ok(Self {
            initiator,
            responder,
            id: TransferId(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_string_roundtrip() {
        let chid = ChannelId::new(PeerId::random(), PeerId::random(), TransferId(7));
        let parsed: ChannelId = chid.to_string().parse().unwrap();
        assert_eq!(parsed, chid);
    }

    #[test]
    fn other_party() {
        let a = PeerId::random();
        let b = PeerId::random();
        let chid = ChannelId::new(a, b, TransferId(1));
        assert_eq!(chid.other_party(a), b);
        assert_eq!(chid.other_party(b), a);
    }

    #[test]
    fn malformed_rejected() {
        assert!("not-a-channel-id-at-all".parse::<ChannelId>().is_err());
        assert!("just".parse::<ChannelId>().is_err());
    }
}
