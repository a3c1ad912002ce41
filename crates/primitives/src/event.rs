//! Channel events.
//!
//! Events are the only way a channel record is mutated. They arrive from
//! three directions: the local caller (through the manager), the transport,
//! and the remote peer (through the network receiver). The store applies
//! them through the transition table and fans the `(event, snapshot)` pair
//! out to subscribers after persisting.

use std::fmt::{self, Display, Formatter};

use crate::{ContentId, TypedPayload};

/// An event applied to a data-transfer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The initiator's open request was sent and the transfer may begin.
    Open,
    /// The responder accepted the transfer.
    Accept,
    /// The channel is being restarted; byte counters are kept.
    Restart,
    /// Bytes were queued for transmission.
    DataQueued {
        /// Number of bytes queued.
        bytes: u64,
    },
    /// Bytes were transmitted.
    DataSent {
        /// Number of bytes sent.
        bytes: u64,
    },
    /// Bytes were received.
    DataReceived {
        /// Number of bytes received.
        bytes: u64,
        /// Identifier of the received block.
        cid: ContentId,
    },
    /// The initiator paused the channel.
    PauseInitiator,
    /// The initiator resumed the channel.
    ResumeInitiator,
    /// The responder paused the channel.
    PauseResponder,
    /// The responder resumed the channel.
    ResumeResponder,
    /// A new voucher was presented (revalidation).
    NewVoucher(TypedPayload),
    /// A new voucher result arrived from the validator.
    NewVoucherResult(TypedPayload),
    /// The sender finished queueing all data for the transfer.
    FinishTransfer,
    /// The responder reported the transfer complete.
    ResponderCompletes,
    /// Final bookkeeping has begun.
    BeginFinalizing,
    /// The transfer completed.
    Complete,
    /// The channel failed.
    Error {
        /// Human-readable description of the failure.
        message: String,
    },
    /// Cleanup finished; resolve to the terminal status.
    CleanupComplete,
    /// The transfer is being cancelled.
    Cancel,
}

impl ChannelEvent {
    /// Short name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Open => "Open",
            ChannelEvent::Accept => "Accept",
            ChannelEvent::Restart => "Restart",
            ChannelEvent::DataQueued { .. } => "DataQueued",
            ChannelEvent::DataSent { .. } => "DataSent",
            ChannelEvent::DataReceived { .. } => "DataReceived",
            ChannelEvent::PauseInitiator => "PauseInitiator",
            ChannelEvent::ResumeInitiator => "ResumeInitiator",
            ChannelEvent::PauseResponder => "PauseResponder",
            ChannelEvent::ResumeResponder => "ResumeResponder",
            ChannelEvent::NewVoucher(_) => "NewVoucher",
            ChannelEvent::NewVoucherResult(_) => "NewVoucherResult",
            ChannelEvent::FinishTransfer => "FinishTransfer",
            ChannelEvent::ResponderCompletes => "ResponderCompletes",
            ChannelEvent::BeginFinalizing => "BeginFinalizing",
            ChannelEvent::Complete => "Complete",
            ChannelEvent::Error { .. } => "Error",
            ChannelEvent::CleanupComplete => "CleanupComplete",
            ChannelEvent::Cancel => "Cancel",
        }
    }
}

impl Display for ChannelEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
