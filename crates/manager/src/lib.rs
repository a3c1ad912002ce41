//! The conduit data-transfer manager.
//!
//! This crate assembles the channel store, the type registries, the push
//! monitor, a wire transport and a peer network into the coordinator's
//! public API: opening push and pull transfers, pausing, resuming, closing
//! and restarting them, dispatching vouchers, and fanning channel events out
//! to subscribers.

#![warn(missing_docs)]

/// Manager errors.
pub mod error;
pub use error::ManagerError;

/// Manager configuration.
pub mod options;
pub use options::{ManagerOptions, DEFAULT_CHANNEL_REMOVE_TIMEOUT, DEFAULT_RECONNECT_GRACE};

/// The persisted transfer counter.
pub mod counter;
pub use counter::TransferCounter;

/// Event fan-out.
pub mod events;
pub use events::{EventPublisher, ReadyPublisher};

/// The manager itself.
pub mod manager;
pub use manager::Manager;

/// Inbound message dispatch.
pub mod receiver;
pub use receiver::Receiver;

/// Transport event sink.
pub mod transport_events;
pub use transport_events::TransportHandle;

mod handle;
