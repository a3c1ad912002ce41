//! Weak manager handle.
//!
//! The monitor holds the manager (for restarts) and the manager holds the
//! monitor; this handle cuts the cycle by giving the monitor — and the
//! manager's own background tasks — only a weak reference behind the narrow
//! [`MonitorApi`] capability set.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

use conduit_api::{Subscriber, Unsubscribe};
use conduit_monitor::{MonitorApi, MonitorApiError};
use conduit_primitives::ChannelId;

use crate::manager::Manager;

/// A weak reference to the manager, installed after construction.
#[derive(Default)]
pub(crate) struct ManagerHandle {
    inner: RwLock<Weak<Manager>>,
}

impl ManagerHandle {
    pub(crate) fn set(&self, manager: Weak<Manager>) {
        *self.inner.write() = manager;
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<Manager>> {
        self.inner.read().upgrade()
    }
}

#[async_trait]
impl MonitorApi for ManagerHandle {
    fn subscribe(&self, subscriber: Subscriber) -> Unsubscribe {
        match self.upgrade() {
            Some(manager) => manager.subscribe_to_events(subscriber),
            None => Box::new(|| {}),
        }
    }

    async fn restart_channel(&self, chid: ChannelId) -> Result<(), MonitorApiError> {
        match self.upgrade() {
            Some(manager) => manager
                .restart_channel(chid)
                .await
                .map_err(|e| MonitorApiError(e.to_string())),
            None => Err(MonitorApiError("manager has shut down".into())),
        }
    }

    async fn close_channel_with_error(&self, chid: ChannelId, reason: String) {
        let Some(manager) = self.upgrade() else {
            return;
        };
        if let Err(e) = manager.close_channel_with_error(chid, reason).await {
            warn!(%chid, error = %e, "monitor-initiated close failed");
        }
    }
}
