//! Voucher validation interfaces.
//!
//! The core never interprets voucher payloads. Applications register these
//! processors per voucher type; the manager dispatches to them by type
//! identifier.

use async_trait::async_trait;
use libp2p_identity::PeerId;

use conduit_primitives::{ChannelId, ContentId, Selector, TypedPayload};

use crate::Transport;

/// A voucher was refused.
#[derive(Debug, Clone, thiserror::Error)]
#[error("validation rejected: {0}")]
pub struct ValidationRejected(pub String);

/// A successful validation verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The transfer may proceed.
    Accepted {
        /// Typed response for the initiator, if any.
        result: Option<TypedPayload>,
    },
    /// The transfer is authorized but paused until a further voucher
    /// arrives.
    Paused {
        /// Typed response for the initiator, if any.
        result: Option<TypedPayload>,
    },
}

impl Validation {
    /// The validator's typed response, if any.
    pub fn result(&self) -> Option<&TypedPayload> {
        match self {
            Validation::Accepted { result } | Validation::Paused { result } => result.as_ref(),
        }
    }

    /// Returns true for the paused verdict.
    pub fn is_paused(&self) -> bool {
        matches!(self, Validation::Paused { .. })
    }
}

/// Validates the voucher attached to an opening request.
#[async_trait]
pub trait RequestValidator: Send + Sync {
    /// Validate a push request: `sender` wants to send us data.
    async fn validate_push(
        &self,
        sender: PeerId,
        voucher: &TypedPayload,
        root: ContentId,
        selector: &Selector,
    ) -> Result<Validation, ValidationRejected>;

    /// Validate a pull request: `recipient` wants data from us.
    async fn validate_pull(
        &self,
        recipient: PeerId,
        voucher: &TypedPayload,
        root: ContentId,
        selector: &Selector,
    ) -> Result<Validation, ValidationRejected>;
}

/// Validates vouchers re-presented mid-transfer.
#[async_trait]
pub trait Revalidator: Send + Sync {
    /// Judge a new voucher for an ongoing channel.
    async fn revalidate(
        &self,
        chid: ChannelId,
        voucher: &TypedPayload,
    ) -> Result<Validation, ValidationRejected>;
}

/// Hook run against the transport when a channel with a matching voucher
/// type is created, before any data flows.
pub trait TransportConfigurer: Send + Sync {
    /// Configure the transport for the channel.
    fn configure(&self, chid: ChannelId, voucher: &TypedPayload, transport: &dyn Transport);
}
