//! Liveness monitor for conduit push channels.
//!
//! A push sender has no transport-level signal that the recipient stopped
//! pulling data; a stalled channel just sits there. The monitor watches the
//! data-rate of every push channel over a sliding window and restarts
//! channels that had data pending but failed to move a minimum number of
//! bytes, with bounded consecutive restarts so a dead peer cannot cause
//! oscillation.
//!
//! # Design
//!
//! The monitor sees the manager only through the narrow [`MonitorApi`]
//! capability set (subscribe, restart, close-with-error). Shutdown is
//! strictly manager → monitor, never the reverse.

#![warn(missing_docs)]

/// Monitor configuration.
pub mod config;
pub use config::{MonitorConfig, MonitorConfigError};

/// The capability set the monitor needs from the manager.
pub mod api;
pub use api::{MonitorApi, MonitorApiError};

/// The monitor itself.
pub mod monitor;
pub use monitor::Monitor;

/// Per-channel watchdog state.
pub mod channel;
pub use channel::MonitoredChannel;
