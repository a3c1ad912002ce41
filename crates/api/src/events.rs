//! Event subscription aliases.

use std::sync::Arc;

use conduit_primitives::{ChannelEvent, ChannelRecord};

/// A channel-event listener.
///
/// Listeners are invoked synchronously with the `(event, snapshot)` pair
/// after the transition has been persisted, in per-channel apply order.
/// They are contractually non-blocking; a slow listener slows the whole
/// event pipeline.
pub type Subscriber = Arc<dyn Fn(&ChannelEvent, &ChannelRecord) + Send + Sync>;

/// Removes a subscription when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// One-shot listener for manager readiness.
///
/// Receives the recovery error when startup state restoration failed.
pub type ReadyFn = Box<dyn FnOnce(Option<String>) + Send>;
