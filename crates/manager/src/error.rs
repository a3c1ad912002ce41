//! Manager error types.

use conduit_api::{NetworkError, TransportError};
use conduit_channels::{ChannelError, CidListError};
use conduit_monitor::MonitorConfigError;
use conduit_primitives::{ChannelId, TypeIdentifier};
use conduit_registry::RegistryError;

/// Errors surfaced by manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// No validator has been registered for the voucher's type.
    #[error("no validator registered for voucher type {0}")]
    UnknownVoucherType(TypeIdentifier),

    /// Vouchers can only be sent on transfers the local peer initiated.
    #[error("cannot send voucher for a transfer we did not initiate")]
    NotInitiator,

    /// The transport does not implement the pause/resume capability.
    #[error("transport does not support pause/resume")]
    Unsupported,

    /// The channel record was created but the opening (or restart) request
    /// could not be sent. The id remains valid for inspection; the record
    /// has been moved to `Failing`.
    #[error("unable to send request for channel {chid}: {reason}")]
    RequestNotSent {
        /// The channel whose request failed.
        chid: ChannelId,
        /// Why the send failed.
        reason: String,
    },

    /// A channel store operation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A network send failed; treated as a disconnect.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The received-CID lists could not be opened.
    #[error(transparent)]
    CidList(#[from] CidListError),

    /// The transfer counter could not be read or written.
    #[error("transfer counter: {0}")]
    Counter(#[from] std::io::Error),

    /// The push monitor configuration was invalid.
    #[error(transparent)]
    MonitorConfig(#[from] MonitorConfigError),
}
