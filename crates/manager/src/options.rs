//! Manager configuration.

use std::time::Duration;

use conduit_monitor::MonitorConfig;

/// Default time a terminated channel record is kept around so late events
/// can still be resolved.
pub const DEFAULT_CHANNEL_REMOVE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default time to wait for a disconnected peer to come back before failing
/// its channels.
pub const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_secs(60);

/// Configuration of the data-transfer manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// How long terminated channel records are kept before removal.
    pub channel_remove_timeout: Duration,
    /// How long to wait for a disconnected peer to reconnect before the
    /// affected channels are errored.
    pub reconnect_grace: Duration,
    /// Push-channel monitor configuration. `None` disables automatic
    /// restarts of stalled push channels.
    pub push_monitor: Option<MonitorConfig>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            channel_remove_timeout: DEFAULT_CHANNEL_REMOVE_TIMEOUT,
            reconnect_grace: DEFAULT_RECONNECT_GRACE,
            push_monitor: None,
        }
    }
}

impl ManagerOptions {
    /// Sets the channel removal timeout.
    pub fn with_channel_remove_timeout(mut self, timeout: Duration) -> Self {
        self.channel_remove_timeout = timeout;
        self
    }

    /// Enables the push-channel monitor.
    pub fn with_push_monitor(mut self, cfg: MonitorConfig) -> Self {
        self.push_monitor = Some(cfg);
        self
    }

    /// Sets the reconnect grace period.
    pub fn with_reconnect_grace(mut self, grace: Duration) -> Self {
        self.reconnect_grace = grace;
        self
    }
}
