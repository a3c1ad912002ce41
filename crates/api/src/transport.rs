//! The wire transport consumed by the core.
//!
//! The transport owns block framing, graph traversal and link-layer
//! backpressure. The core drives it through [`Transport`] and observes it
//! through the [`TransportEvents`] sink it installs at startup.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p_identity::PeerId;

use conduit_messages::TransferMessage;
use conduit_primitives::{ChannelId, ContentId, Selector};

/// Errors surfaced by transport operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The transport does not know the channel.
    #[error("transport channel not found: {0}")]
    ChannelNotFound(ChannelId),
    /// The transport failed to reach the peer.
    #[error("transport disconnected: {0}")]
    Disconnected(String),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// A pluggable wire transport for content-addressed block streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an outbound channel to `to`, requesting the subgraph described
    /// by `root` and `selector`.
    ///
    /// `do_not_send` lists blocks the recipient already holds (restart
    /// resumption); the sender skips them. `msg` piggybacks the logical
    /// open/restart request on the transport's own opening exchange.
    async fn open_channel(
        &self,
        to: PeerId,
        chid: ChannelId,
        root: ContentId,
        selector: Selector,
        do_not_send: Vec<ContentId>,
        msg: TransferMessage,
    ) -> Result<(), TransportError>;

    /// Close a channel, interrupting any in-flight data.
    async fn close_channel(&self, chid: ChannelId) -> Result<(), TransportError>;

    /// Install the sink that receives transport events.
    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>);

    /// Shut the transport down, closing all channels.
    async fn shutdown(&self);

    /// Capability probe: returns the pause/resume interface if this
    /// transport implements it.
    fn pausable(&self) -> Option<&dyn PausableTransport> {
        None
    }
}

/// Optional pause/resume capability of a [`Transport`].
#[async_trait]
pub trait PausableTransport: Send + Sync {
    /// Stop sending and receiving on the channel without closing it.
    async fn pause_channel(&self, chid: ChannelId) -> Result<(), TransportError>;

    /// Resume a paused channel. `msg` is delivered to the peer along with
    /// the resumption.
    async fn resume_channel(
        &self,
        chid: ChannelId,
        msg: TransferMessage,
    ) -> Result<(), TransportError>;
}

/// Sink for events the transport raises while moving data.
///
/// The core installs itself as the handler; the transport calls these from
/// its own tasks, so implementations must tolerate concurrent invocation.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    /// The remote peer opened (or re-opened) the channel on the transport.
    async fn on_transfer_initiated(&self, chid: ChannelId);

    /// Bytes were queued for transmission.
    async fn on_data_queued(&self, chid: ChannelId, bytes: u64);

    /// Bytes were transmitted.
    async fn on_data_sent(&self, chid: ChannelId, bytes: u64);

    /// A block was received.
    async fn on_data_received(&self, chid: ChannelId, bytes: u64, cid: ContentId);

    /// The transport finished the transfer on its side.
    ///
    /// `error` is `Some` when the transport completed abnormally.
    async fn on_channel_completed(&self, chid: ChannelId, error: Option<String>);

    /// The transport hit an unrecoverable error on the channel.
    async fn on_transport_error(&self, chid: ChannelId, error: String);

    /// The connection carrying the channel dropped.
    async fn on_request_disconnected(&self, chid: ChannelId);
}
