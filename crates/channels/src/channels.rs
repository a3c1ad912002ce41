//! The channel store front-end.
//!
//! [`Channels`] owns every channel record. All mutation flows through
//! [`Channels::update`]: events are serialized per channel, run through the
//! transition table, persisted in full, and only then fanned out to the
//! notifier. Across channels no ordering is guaranteed.
//!
//! # Lock Strategy
//!
//! - `locks: Mutex<HashMap<..>>` - held only to fetch/insert a per-channel
//!   lock handle
//! - per-channel `Mutex<()>` - held across apply + persist + notify, which
//!   is what gives subscribers the per-channel total order
//! - the backing store handles its own synchronization

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libp2p_identity::PeerId;
use parking_lot::Mutex;
use tracing::{debug, warn};

use conduit_primitives::{
    ChannelEvent, ChannelId, ChannelRecord, ContentId, Selector, Status, TransferId, TypedPayload,
};

use crate::cid_lists::{CidListError, CidLists};
use crate::fsm::{next_status, Transition};
use crate::store::{ChannelRecordStore, RecordStoreError};

/// Callback invoked with every `(event, snapshot-after)` pair once the
/// transition has been persisted.
pub type Notifier = Box<dyn Fn(&ChannelEvent, &ChannelRecord) + Send + Sync>;

/// Errors surfaced by channel store operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel id is unknown.
    #[error("channel not found: {0}")]
    NotFound(ChannelId),
    /// A record already exists for the channel id.
    #[error("channel already exists: {0}")]
    AlreadyExists(ChannelId),
    /// The state machine rejected the event.
    #[error("invalid transition: {event} while {status} on channel {chid}")]
    InvalidTransition {
        /// The channel the event was offered to.
        chid: ChannelId,
        /// Its status at the time.
        status: Status,
        /// The rejected event.
        event: &'static str,
    },
    /// The sender and recipient of a channel must differ.
    #[error("sender and recipient are the same peer: {0}")]
    SelfTransfer(PeerId),
    /// The backing record store failed.
    #[error(transparent)]
    Store(#[from] RecordStoreError),
    /// The received-CID list failed.
    #[error(transparent)]
    CidList(#[from] CidListError),
}

/// Durable map of channel id → channel record, driving each record through
/// the state machine.
pub struct Channels {
    store: Arc<dyn ChannelRecordStore>,
    cid_lists: Arc<CidLists>,
    notifier: Notifier,
    locks: Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
    /// Events are only emitted once recovery has finished.
    started: AtomicBool,
    remove_timeout: Duration,
}

impl Channels {
    /// Creates the channel store over a record store and CID-list directory.
    pub fn new(
        store: Arc<dyn ChannelRecordStore>,
        cid_lists: Arc<CidLists>,
        notifier: Notifier,
        remove_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cid_lists,
            notifier,
            locks: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            remove_timeout,
        }
    }

    /// Replay persisted records so every channel resumes in a consistent
    /// status, then begin emitting events normally.
    ///
    /// Records found in a cleaning-up status are driven to their terminal;
    /// `Ongoing` records stay ongoing — callers distinguish a crashed
    /// transfer from a slow peer by restarting with the received-CID skip
    /// set.
    pub fn start(&self) -> Result<(), ChannelError> {
        let records = self.store.load_all()?;
        let mut resolved = 0usize;
        for record in &records {
            if record.status.is_cleaning_up() {
                self.update(record.id, ChannelEvent::CleanupComplete)?;
                resolved += 1;
            }
        }
        self.started.store(true, Ordering::SeqCst);
        debug!(
            total = records.len(),
            resolved, "channel store recovery complete"
        );
        Ok(())
    }

    /// Persist a fresh record in `Requested`.
    ///
    /// `initiator` must be either `sender` or `recipient`; the counterparty
    /// becomes the responder. Fails with [`ChannelError::AlreadyExists`] if
    /// the triple is already present.
    #[allow(clippy::too_many_arguments)]
    pub fn create_new(
        &self,
        tid: TransferId,
        base_root: ContentId,
        selector: Selector,
        voucher: TypedPayload,
        initiator: PeerId,
        sender: PeerId,
        recipient: PeerId,
    ) -> Result<ChannelId, ChannelError> {
        if sender == recipient {
            return Err(ChannelError::SelfTransfer(sender));
        }
        let responder = if initiator == sender { recipient } else { sender };
        let chid = ChannelId::new(initiator, responder, tid);

        let lock = self.channel_lock(chid);
        let _guard = lock.lock();

        if self.store.contains(&chid)? {
            return Err(ChannelError::AlreadyExists(chid));
        }

        let is_pull = initiator == recipient;
        let record = ChannelRecord::new(chid, sender, recipient, is_pull, base_root, selector, voucher);
        self.store.save(&record)?;
        debug!(%chid, is_pull, "created channel record");
        Ok(chid)
    }

    /// Fetch a record.
    pub fn get_by_id(&self, chid: ChannelId) -> Result<ChannelRecord, ChannelError> {
        self.store
            .get(&chid)?
            .ok_or(ChannelError::NotFound(chid))
    }

    /// The channel's status, or the not-found sentinel.
    pub fn status_of(&self, chid: ChannelId) -> Status {
        match self.store.get(&chid) {
            Ok(Some(record)) => record.status,
            _ => Status::ChannelNotFoundError,
        }
    }

    /// All channels not yet in a terminal status.
    pub fn in_progress(&self) -> Result<HashMap<ChannelId, ChannelRecord>, ChannelError> {
        Ok(self
            .store
            .load_all()?
            .into_iter()
            .filter(|record| !record.status.is_terminated())
            .map(|record| (record.id, record))
            .collect())
    }

    /// Apply an event to a channel.
    ///
    /// Returns the snapshot after the event. An event that does not apply at
    /// the current status is a no-op (logged at debug); an event the state
    /// machine rejects fails with [`ChannelError::InvalidTransition`]. The
    /// record is persisted before the notifier runs.
    pub fn update(
        &self,
        chid: ChannelId,
        event: ChannelEvent,
    ) -> Result<ChannelRecord, ChannelError> {
        let lock = self.channel_lock(chid);
        let _guard = lock.lock();

        let mut record = self
            .store
            .get(&chid)?
            .ok_or(ChannelError::NotFound(chid))?;

        let next = match next_status(record.status, &event) {
            Transition::To(next) => next,
            Transition::Ignore => {
                debug!(%chid, status = %record.status, event = %event, "event does not apply, ignoring");
                return Ok(record);
            }
            Transition::Invalid => {
                return Err(ChannelError::InvalidTransition {
                    chid,
                    status: record.status,
                    event: event.name(),
                });
            }
        };

        self.apply_effects(&mut record, &event)?;
        let was_terminal = record.status.is_terminated();
        record.status = next;
        self.store.save(&record)?;

        if self.started.load(Ordering::SeqCst) {
            (self.notifier)(&event, &record);
        }

        if next.is_terminated() && !was_terminal {
            self.schedule_removal(chid);
        }

        Ok(record)
    }

    /// Drive a channel found in a cleaning-up status to its terminal.
    pub fn complete_cleanup_on_restart(&self, chid: ChannelId) -> Result<(), ChannelError> {
        let record = self.get_by_id(chid)?;
        if !record.status.is_cleaning_up() {
            debug!(%chid, status = %record.status, "no cleanup to complete");
            return Ok(());
        }
        self.update(chid, ChannelEvent::CleanupComplete)?;
        Ok(())
    }

    /// Record a failure on the channel.
    pub fn error(&self, chid: ChannelId, message: impl Into<String>) -> Result<(), ChannelError> {
        self.update(
            chid,
            ChannelEvent::Error {
                message: message.into(),
            },
        )?;
        Ok(())
    }

    /// Begin cancelling the channel.
    pub fn cancel(&self, chid: ChannelId) -> Result<(), ChannelError> {
        self.update(chid, ChannelEvent::Cancel)?;
        Ok(())
    }

    /// Every block id received on the channel so far.
    pub fn received_cids(&self, chid: ChannelId) -> Vec<ContentId> {
        self.cid_lists.get(&chid)
    }

    fn channel_lock(&self, chid: ChannelId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(chid).or_default())
    }

    /// Mutate the record for an accepted event.
    fn apply_effects(
        &self,
        record: &mut ChannelRecord,
        event: &ChannelEvent,
    ) -> Result<(), ChannelError> {
        match event {
            ChannelEvent::DataQueued { bytes } => record.queued += bytes,
            ChannelEvent::DataSent { bytes } => record.sent += bytes,
            ChannelEvent::DataReceived { bytes, cid } => {
                record.received += bytes;
                self.cid_lists.append(record.id, *cid)?;
            }
            ChannelEvent::NewVoucher(voucher) => record.vouchers.push(voucher.clone()),
            ChannelEvent::NewVoucherResult(result) => record.voucher_results.push(result.clone()),
            ChannelEvent::Error { message } => {
                // The first error is authoritative; later ones only log.
                if record.message.is_empty() {
                    record.message = message.clone();
                } else {
                    debug!(chid = %record.id, error = %message, "further error on failing channel");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Keep terminal records around long enough for late events to resolve,
    /// then drop them and their CID lists.
    fn schedule_removal(&self, chid: ChannelId) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let cid_lists = Arc::clone(&self.cid_lists);
        let timeout = self.remove_timeout;
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = store.remove(&chid) {
                warn!(%chid, error = %e, "failed to remove terminated channel record");
            }
            if let Err(e) = cid_lists.delete(&chid) {
                warn!(%chid, error = %e, "failed to remove received-CID list");
            }
        });
    }
}
