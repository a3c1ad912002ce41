//! Transport event sink.
//!
//! The manager installs a [`TransportHandle`] as the transport's event
//! handler at startup; transport events become state-machine events here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use conduit_api::TransportEvents;
use conduit_primitives::{ChannelEvent, ChannelId, ContentId};

use crate::manager::Manager;

/// The transport's view of the manager.
pub struct TransportHandle {
    manager: Arc<Manager>,
}

impl TransportHandle {
    pub(crate) fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    fn apply(&self, chid: ChannelId, event: ChannelEvent) {
        if let Err(e) = self.manager.channels.update(chid, event) {
            warn!(%chid, error = %e, "applying transport event");
        }
    }
}

#[async_trait]
impl TransportEvents for TransportHandle {
    async fn on_transfer_initiated(&self, chid: ChannelId) {
        self.apply(chid, ChannelEvent::Open);
    }

    async fn on_data_queued(&self, chid: ChannelId, bytes: u64) {
        self.apply(chid, ChannelEvent::DataQueued { bytes });
    }

    async fn on_data_sent(&self, chid: ChannelId, bytes: u64) {
        self.apply(chid, ChannelEvent::DataSent { bytes });
    }

    async fn on_data_received(&self, chid: ChannelId, bytes: u64, cid: ContentId) {
        self.apply(chid, ChannelEvent::DataReceived { bytes, cid });
    }

    async fn on_channel_completed(&self, chid: ChannelId, error: Option<String>) {
        match error {
            Some(message) => {
                if let Err(e) = self
                    .manager
                    .channels
                    .error(chid, format!("transport failed: {message}"))
                {
                    warn!(%chid, error = %e, "recording transport failure");
                }
            }
            None => self.manager.complete_transfer(chid).await,
        }
    }

    async fn on_transport_error(&self, chid: ChannelId, error: String) {
        if let Err(e) = self
            .manager
            .channels
            .error(chid, format!("transport error: {error}"))
        {
            warn!(%chid, error = %e, "recording transport error");
        }
    }

    async fn on_request_disconnected(&self, chid: ChannelId) {
        self.manager.on_disconnected(chid);
    }
}
