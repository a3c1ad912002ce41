//! Monitor configuration.

use std::time::Duration;

/// Configuration of the push-channel monitor.
///
/// Every field is required and must be strictly positive; construction of a
/// [`Monitor`](crate::Monitor) rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Max wall-time from channel creation to receipt of the responder's
    /// accept.
    pub accept_timeout: Duration,
    /// Sliding-window length for the data-rate check.
    pub interval: Duration,
    /// Number of sample points per window. The check tick is
    /// `interval / checks_per_interval`.
    pub checks_per_interval: u32,
    /// Minimum bytes that must be transmitted per interval for the channel
    /// to count as alive.
    pub min_bytes_sent: u64,
    /// Quiet period after issuing a restart before another may be issued.
    pub restart_backoff: Duration,
    /// Consecutive restarts without progress before the channel is closed
    /// with an error.
    pub max_consecutive_restarts: u32,
    /// Max wall-time from the local side finishing its data to the
    /// responder's completion message.
    pub complete_timeout: Duration,
}

/// A monitor config field was not strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("push channel monitor config: {field} must be > 0")]
pub struct MonitorConfigError {
    /// The offending field.
    pub field: &'static str,
}

impl MonitorConfig {
    /// Checks that every field is strictly positive.
    pub fn validate(&self) -> Result<(), MonitorConfigError> {
        let field = if self.accept_timeout.is_zero() {
            "accept_timeout"
        } else if self.interval.is_zero() {
            "interval"
        } else if self.checks_per_interval == 0 {
            "checks_per_interval"
        } else if self.min_bytes_sent == 0 {
            "min_bytes_sent"
        } else if self.max_consecutive_restarts == 0 {
            "max_consecutive_restarts"
        } else if self.complete_timeout.is_zero() {
            "complete_timeout"
        } else {
            return Ok(());
        };
        Err(MonitorConfigError { field })
    }

    /// The tick at which every monitored channel is sampled.
    pub fn check_tick(&self) -> Duration {
        self.interval / self.checks_per_interval
    }
}
