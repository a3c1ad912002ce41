//! Logical wire messages exchanged by conduit peers.
//!
//! This crate fixes the message *set* and its required fields; byte-level
//! framing is the transport's concern. Every message identifies its channel
//! either through the initiator-allocated [`TransferId`] (the sender/receiver
//! pair completes the triple) or, for restarts of channels the receiving
//! peer may have forgotten, through the full [`ChannelId`].

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

use conduit_primitives::{ChannelId, ContentId, Selector, TransferId, TypedPayload};

// ============================================================================
// Requests
// ============================================================================

/// A request sent between peers about a data-transfer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferRequest {
    /// Open a new transfer, or restart one the responder should still know.
    New {
        /// Transfer counter value allocated by the initiator.
        transfer_id: TransferId,
        /// Pull: the initiator is the recipient. Push: the initiator is the
        /// sender.
        is_pull: bool,
        /// Root of the requested subgraph.
        root: ContentId,
        /// Which subgraph of `root` to transfer.
        selector: Selector,
        /// Authorization for the transfer.
        voucher: TypedPayload,
        /// Set when this request restarts an existing channel rather than
        /// opening a fresh one.
        restart_channel: Option<ChannelId>,
    },
    /// Ask the remote peer to restart an existing channel from its side.
    Restart {
        /// The channel to restart.
        channel_id: ChannelId,
    },
    /// Cancel a transfer.
    Cancel {
        /// Transfer to cancel.
        transfer_id: TransferId,
    },
    /// Pause or resume a transfer.
    Update {
        /// Transfer to update.
        transfer_id: TransferId,
        /// True to pause, false to resume.
        paused: bool,
    },
    /// Present a new voucher mid-transfer (revalidation).
    Voucher {
        /// Transfer being revalidated.
        transfer_id: TransferId,
        /// The new voucher.
        voucher: TypedPayload,
    },
}

impl TransferRequest {
    /// The transfer id this request refers to.
    pub fn transfer_id(&self) -> TransferId {
        match self {
            TransferRequest::New { transfer_id, .. }
            | TransferRequest::Cancel { transfer_id }
            | TransferRequest::Update { transfer_id, .. }
            | TransferRequest::Voucher { transfer_id, .. } => *transfer_id,
            TransferRequest::Restart { channel_id } => channel_id.id,
        }
    }

    /// Short name of the request kind, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TransferRequest::New { .. } => "New",
            TransferRequest::Restart { .. } => "Restart",
            TransferRequest::Cancel { .. } => "Cancel",
            TransferRequest::Update { .. } => "Update",
            TransferRequest::Voucher { .. } => "Voucher",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// The responder's answer to a transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    /// Transfer the response refers to.
    pub transfer_id: TransferId,
    /// Whether the request was accepted.
    pub accepted: bool,
    /// Whether the responder paused the channel (e.g. validation requires
    /// a further voucher before data flows).
    pub paused: bool,
    /// Whether the responder considers the transfer complete.
    pub completed: bool,
    /// Typed response from the validator, if any.
    pub voucher_result: Option<TypedPayload>,
    /// Present when the request was refused or the transfer failed.
    pub error_message: Option<String>,
}

impl TransferResponse {
    /// An accepting response.
    pub fn accepted(transfer_id: TransferId, voucher_result: Option<TypedPayload>) -> Self {
        Self {
            transfer_id,
            accepted: true,
            paused: false,
            completed: false,
            voucher_result,
            error_message: None,
        }
    }

    /// An accepting response that also pauses the channel.
    pub fn paused(transfer_id: TransferId, voucher_result: Option<TypedPayload>) -> Self {
        Self {
            paused: true,
            ..Self::accepted(transfer_id, voucher_result)
        }
    }

    /// A completion notice from the responder.
    pub fn completed(transfer_id: TransferId, voucher_result: Option<TypedPayload>) -> Self {
        Self {
            completed: true,
            ..Self::accepted(transfer_id, voucher_result)
        }
    }

    /// A refusal or failure notice.
    pub fn error(transfer_id: TransferId, message: impl Into<String>) -> Self {
        Self {
            transfer_id,
            accepted: false,
            paused: false,
            completed: false,
            voucher_result: None,
            error_message: Some(message.into()),
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Any message a conduit peer can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMessage {
    /// A request.
    Request(TransferRequest),
    /// A response.
    Response(TransferResponse),
}

impl From<TransferRequest> for TransferMessage {
    fn from(req: TransferRequest) -> Self {
        TransferMessage::Request(req)
    }
}

impl From<TransferResponse> for TransferMessage {
    fn from(resp: TransferResponse) -> Self {
        TransferMessage::Response(resp)
    }
}
