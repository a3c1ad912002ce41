//! The persisted channel record.
//!
//! One record exists per active or recently terminated transfer. Records are
//! mutated only by the channel store applying [`ChannelEvent`]s and are
//! persisted in full before any observer sees the transition.

use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};

use crate::{
    serde_peer_id, ChannelId, ContentId, Selector, Status, TypedPayload,
};

/// Persistable state of a single data-transfer channel.
///
/// Received block ids are not part of the record; they live in a separate
/// append-only list keyed by the channel id so restarts can send the remote
/// peer a skip set without deserializing it on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Globally unique channel key.
    pub id: ChannelId,
    /// The peer sending the data.
    #[serde(with = "serde_peer_id")]
    pub sender: PeerId,
    /// The peer receiving the data.
    #[serde(with = "serde_peer_id")]
    pub recipient: PeerId,
    /// Pull transfers: the initiator is also the recipient.
    pub is_pull: bool,
    /// Root of the requested subgraph.
    pub base_root: ContentId,
    /// Which subgraph of `base_root` to transfer.
    pub selector: Selector,
    /// Every voucher presented so far, newest last.
    pub vouchers: Vec<TypedPayload>,
    /// Every voucher result received so far, newest last.
    pub voucher_results: Vec<TypedPayload>,
    /// Current status.
    pub status: Status,
    /// Bytes queued for transmission.
    pub queued: u64,
    /// Bytes transmitted.
    pub sent: u64,
    /// Bytes received.
    pub received: u64,
    /// Last human-readable status message. The first error set on the
    /// channel is preserved here verbatim; later errors never overwrite it.
    pub message: String,
}

impl ChannelRecord {
    /// Creates a fresh record in [`Status::Requested`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ChannelId,
        sender: PeerId,
        recipient: PeerId,
        is_pull: bool,
        base_root: ContentId,
        selector: Selector,
        voucher: TypedPayload,
    ) -> Self {
        Self {
            id,
            sender,
            recipient,
            is_pull,
            base_root,
            selector,
            vouchers: vec![voucher],
            voucher_results: Vec::new(),
            status: Status::Requested,
            queued: 0,
            sent: 0,
            received: 0,
            message: String::new(),
        }
    }

    /// The channel id.
    pub fn channel_id(&self) -> ChannelId {
        self.id
    }

    /// The voucher the transfer was opened with.
    pub fn voucher(&self) -> &TypedPayload {
        // A record is never constructed with an empty voucher history.
        &self.vouchers[0]
    }

    /// The voucher currently authorizing the transfer.
    pub fn last_voucher(&self) -> &TypedPayload {
        &self.vouchers[self.vouchers.len() - 1]
    }

    /// The latest voucher result, if the validator has responded yet.
    pub fn last_voucher_result(&self) -> Option<&TypedPayload> {
        self.voucher_results.last()
    }

    /// The counterparty of `local` on this channel.
    pub fn other_party(&self, local: PeerId) -> PeerId {
        self.id.other_party(local)
    }

    /// Returns true if `peer` initiated this transfer.
    pub fn is_initiator(&self, peer: PeerId) -> bool {
        self.id.initiator == peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransferId;

    fn test_record() -> ChannelRecord {
        let initiator = PeerId::random();
        let responder = PeerId::random();
        ChannelRecord::new(
            ChannelId::new(initiator, responder, TransferId(1)),
            initiator,
            responder,
            false,
            ContentId::new([1u8; 32]),
            Selector::all(),
            TypedPayload::new("test/voucher", vec![1]),
        )
    }

    #[test]
    fn fresh_record_shape() {
        let rec = test_record();
        assert_eq!(rec.status, Status::Requested);
        assert_eq!(rec.vouchers.len(), 1);
        assert_eq!(rec.last_voucher(), rec.voucher());
        assert!(rec.last_voucher_result().is_none());
        assert_eq!((rec.queued, rec.sent, rec.received), (0, 0, 0));
    }

    #[test]
    fn record_serde_roundtrip() {
        let rec = test_record();
        let json = serde_json::to_string(&rec).unwrap();
        let back: ChannelRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
