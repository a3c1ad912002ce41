//! Event fan-out.
//!
//! The manager multicasts every `(event, snapshot)` pair from the channel
//! store to its subscribers, and publishes a single readiness event once
//! startup recovery has finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use conduit_api::{ReadyFn, Subscriber, Unsubscribe};
use conduit_primitives::{ChannelEvent, ChannelRecord};

/// Fan-out of channel events to registered subscribers.
///
/// Dispatch snapshots the subscriber list before invoking anyone, so a
/// subscriber may unsubscribe (itself or others) from inside its callback
/// without deadlocking.
#[derive(Default)]
pub struct EventPublisher {
    subscribers: RwLock<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventPublisher {
    /// Creates an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the returned closure removes it.
    pub fn subscribe(self: &Arc<Self>, subscriber: Subscriber) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, subscriber));

        let this = Arc::clone(self);
        Box::new(move || {
            this.subscribers.write().retain(|(sid, _)| *sid != id);
        })
    }

    /// Deliver an event to every subscriber, in registration order.
    pub fn publish(&self, event: &ChannelEvent, record: &ChannelRecord) {
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in snapshot {
            subscriber(event, record);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether anyone is listening.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

enum ReadyState {
    Pending(Vec<ReadyFn>),
    Ready(Option<String>),
}

/// One-shot readiness notification.
///
/// Listeners registered before readiness are invoked when it is published;
/// listeners registered after are invoked immediately with the recorded
/// outcome.
pub struct ReadyPublisher {
    state: Mutex<ReadyState>,
}

impl ReadyPublisher {
    /// Creates a pending publisher.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReadyState::Pending(Vec::new())),
        }
    }

    /// Register a readiness listener.
    pub fn on_ready(&self, f: ReadyFn) {
        let outcome = {
            let mut state = self.state.lock();
            match &mut *state {
                ReadyState::Pending(listeners) => {
                    listeners.push(f);
                    return;
                }
                ReadyState::Ready(err) => err.clone(),
            }
        };
        f(outcome);
    }

    /// Publish readiness; `error` carries the recovery failure, if any.
    pub fn publish(&self, error: Option<String>) {
        let listeners = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ReadyState::Ready(error.clone())) {
                ReadyState::Pending(listeners) => listeners,
                // Already published; keep the original outcome.
                ReadyState::Ready(original) => {
                    *state = ReadyState::Ready(original);
                    Vec::new()
                }
            }
        };
        for listener in listeners {
            listener(error.clone());
        }
    }
}

impl Default for ReadyPublisher {
    fn default() -> Self {
        Self::new()
    }
}
