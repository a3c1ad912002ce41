//! The peer network consumed by the core.
//!
//! The network owns peer identity, connection management and message
//! delivery. The core sends logical messages through [`TransferNetwork`] and
//! receives inbound ones through the [`MessageReceiver`] delegate it
//! installs.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p_identity::PeerId;

use conduit_messages::{TransferMessage, TransferRequest, TransferResponse};

/// Errors surfaced by network operations.
///
/// A send failure is treated by the core as a disconnect and triggers the
/// reconnect wait.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    /// Sending a message to a peer failed.
    #[error("send to {peer} failed: {reason}")]
    SendFailed {
        /// The unreachable peer.
        peer: PeerId,
        /// Why the send failed.
        reason: String,
    },
    /// The network is shutting down.
    #[error("network shut down")]
    Shutdown,
}

/// The peer-to-peer substrate the coordinator sends messages over.
#[async_trait]
pub trait TransferNetwork: Send + Sync {
    /// The local peer id.
    fn local_peer(&self) -> PeerId;

    /// Send a logical message to a peer.
    async fn send_message(&self, to: PeerId, msg: TransferMessage) -> Result<(), NetworkError>;

    /// Protect the connection to `peer` from connection-manager pruning for
    /// the duration of a transfer. `tag` identifies the protecting channel.
    fn protect(&self, peer: PeerId, tag: String);

    /// Release a protection previously installed with [`protect`].
    ///
    /// [`protect`]: TransferNetwork::protect
    fn unprotect(&self, peer: PeerId, tag: String);

    /// Install the delegate that receives inbound messages.
    fn set_delegate(&self, receiver: Arc<dyn MessageReceiver>);
}

/// Delegate handling inbound messages from remote peers.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// An inbound request arrived from `from`.
    async fn receive_request(&self, from: PeerId, request: TransferRequest);

    /// An inbound response arrived from `from`.
    async fn receive_response(&self, from: PeerId, response: TransferResponse);

    /// The network failed to decode or deliver an inbound message.
    fn receive_error(&self, error: NetworkError);
}
