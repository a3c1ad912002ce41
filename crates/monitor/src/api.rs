//! The capability set the monitor needs from the manager.
//!
//! The manager owns the monitor; giving the monitor this narrow view (and a
//! weak handle behind it) keeps the ownership cycle cut.

use async_trait::async_trait;

use conduit_api::{Subscriber, Unsubscribe};
use conduit_primitives::ChannelId;

/// A restart or close issued by the monitor failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MonitorApiError(pub String);

/// What the monitor is allowed to do to the manager.
#[async_trait]
pub trait MonitorApi: Send + Sync {
    /// Register an event listener.
    fn subscribe(&self, subscriber: Subscriber) -> Unsubscribe;

    /// Restart the channel (role-dispatched by the manager).
    async fn restart_channel(&self, chid: ChannelId) -> Result<(), MonitorApiError>;

    /// Close the channel, recording `reason` as its error.
    async fn close_channel_with_error(&self, chid: ChannelId, reason: String);
}
