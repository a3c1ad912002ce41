//! The data-transfer manager.
//!
//! The manager assembles the registries, the channel store, the push
//! monitor, a transport and a network into the public coordinator API. It
//! owns cross-cutting orchestration: open/pause/resume/close/restart,
//! voucher dispatch, event fan-out and reconnect tracking.
//!
//! # Lock Strategy
//!
//! - registries: RwLock inside [`Registry`] (read-heavy)
//! - `reconnects: RwLock` - writers only when installing/removing entries
//! - channel records: serialized per channel by the store
//! - subscriber list: RwLock inside the publisher, snapshot before dispatch

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use libp2p_identity::PeerId;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use conduit_api::{
    MessageReceiver, RequestValidator, Revalidator, Subscriber, Transport, TransportConfigurer,
    TransportEvents, TransferNetwork, ReadyFn, Unsubscribe, Validation,
};
use conduit_channels::{ChannelError, ChannelRecordStore, Channels, CidLists};
use conduit_messages::{TransferRequest, TransferResponse};
use conduit_monitor::{Monitor, MonitorApi};
use conduit_primitives::{
    ChannelEvent, ChannelId, ChannelRecord, ContentId, Selector, Status, TransferId,
    TypeIdentifier, TypedPayload,
};
use conduit_registry::{PayloadDecoder, Registry};

use crate::counter::TransferCounter;
use crate::error::ManagerError;
use crate::events::{EventPublisher, ReadyPublisher};
use crate::handle::ManagerHandle;
use crate::options::ManagerOptions;
use crate::receiver::Receiver;
use crate::transport_events::TransportHandle;

/// The local peer's relationship to a channel, deciding how a restart is
/// carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelRole {
    /// We created a push channel: re-send the opening request marked as a
    /// restart.
    PushCreator,
    /// We received a push channel: ask the remote to re-open.
    PushReceiver,
    /// We created a pull channel: re-open the transport channel ourselves.
    PullCreator,
    /// We received a pull channel: ask the remote to re-open.
    PullReceiver,
}

/// Coordinates data transfers between the local peer and the network.
pub struct Manager {
    peer_id: PeerId,
    network: Arc<dyn TransferNetwork>,
    transport: Arc<dyn Transport>,
    validators: Registry<Arc<dyn RequestValidator>>,
    revalidators: Registry<Arc<dyn Revalidator>>,
    result_types: Registry<()>,
    transport_configurers: Registry<Arc<dyn TransportConfigurer>>,
    events: Arc<EventPublisher>,
    ready: ReadyPublisher,
    pub(crate) channels: Arc<Channels>,
    counter: TransferCounter,
    reconnects: RwLock<HashMap<ChannelId, Arc<Notify>>>,
    reconnect_grace: Duration,
    monitor: Monitor,
    /// Weak self-reference for background tasks; also the monitor's view of
    /// the manager.
    handle: Arc<ManagerHandle>,
}

impl Manager {
    /// Builds a manager over its collaborators.
    ///
    /// `cid_lists_dir` holds the per-channel received-block lists and
    /// `counter_path` the persisted transfer counter; both live next to the
    /// record store in practice.
    pub fn new(
        store: Arc<dyn ChannelRecordStore>,
        cid_lists_dir: impl Into<PathBuf>,
        counter_path: impl Into<PathBuf>,
        network: Arc<dyn TransferNetwork>,
        transport: Arc<dyn Transport>,
        options: ManagerOptions,
    ) -> Result<Arc<Self>, ManagerError> {
        let peer_id = network.local_peer();
        let cid_lists = Arc::new(CidLists::new(cid_lists_dir)?);
        let counter = TransferCounter::open(counter_path)?;

        let events = Arc::new(EventPublisher::new());
        let notifier = {
            let events = Arc::clone(&events);
            Box::new(move |event: &ChannelEvent, record: &ChannelRecord| {
                events.publish(event, record)
            })
        };
        let channels = Arc::new(Channels::new(
            store,
            cid_lists,
            notifier,
            options.channel_remove_timeout,
        ));

        let handle = Arc::new(ManagerHandle::default());
        let monitor = Monitor::new(
            Arc::clone(&handle) as Arc<dyn MonitorApi>,
            options.push_monitor,
        )?;

        let manager = Arc::new(Self {
            peer_id,
            network,
            transport,
            validators: Registry::new(),
            revalidators: Registry::new(),
            result_types: Registry::new(),
            transport_configurers: Registry::new(),
            events,
            ready: ReadyPublisher::new(),
            channels,
            counter,
            reconnects: RwLock::new(HashMap::new()),
            reconnect_grace: options.reconnect_grace,
            monitor,
            handle: Arc::clone(&handle),
        });
        handle.set(Arc::downgrade(&manager));
        Ok(manager)
    }

    /// The local peer id.
    pub fn local_peer(&self) -> PeerId {
        self.peer_id
    }

    pub(crate) fn network(&self) -> &Arc<dyn TransferNetwork> {
        &self.network
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start transfer processing: spawn state recovery, install the network
    /// delegate and the transport event sink, start the push monitor.
    ///
    /// Recovery completion (with any error) is published to
    /// [`on_ready`](Manager::on_ready) listeners.
    pub async fn start(self: &Arc<Self>) {
        info!("starting data transfer manager");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.channels.start();
            if let Err(e) = &result {
                error!(error = %e, "recovering data transfer channel state");
            }
            this.ready.publish(result.err().map(|e| e.to_string()));
        });

        self.network
            .set_delegate(Arc::new(Receiver::new(Arc::clone(self))));
        self.transport
            .set_event_handler(Arc::new(TransportHandle::new(Arc::clone(self))));
        self.monitor.start();
    }

    /// Stop transfer processing: shut the monitor, then the transport, then
    /// flush the counter.
    pub async fn stop(&self) {
        info!("stopping data transfer manager");
        self.monitor.shutdown();
        self.transport.shutdown().await;
        if let Err(e) = self.counter.close() {
            warn!(error = %e, "flushing transfer counter");
        }
    }

    /// Register a one-shot readiness listener.
    pub fn on_ready(&self, f: ReadyFn) {
        self.ready.on_ready(f);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a validator (and payload decoder) for a voucher type.
    pub fn register_voucher_type(
        &self,
        type_id: TypeIdentifier,
        decoder: PayloadDecoder,
        validator: Arc<dyn RequestValidator>,
    ) -> Result<(), ManagerError> {
        self.validators.register(type_id, decoder, validator)?;
        Ok(())
    }

    /// Register a revalidator for a voucher type presented mid-transfer.
    ///
    /// The type may equal a registered voucher type or be its own.
    pub fn register_revalidator(
        &self,
        type_id: TypeIdentifier,
        decoder: PayloadDecoder,
        revalidator: Arc<dyn Revalidator>,
    ) -> Result<(), ManagerError> {
        self.revalidators.register(type_id, decoder, revalidator)?;
        Ok(())
    }

    /// Register a voucher result type so inbound results can be decoded.
    pub fn register_voucher_result_type(
        &self,
        type_id: TypeIdentifier,
        decoder: PayloadDecoder,
    ) -> Result<(), ManagerError> {
        self.result_types.register(type_id, decoder, ())?;
        Ok(())
    }

    /// Register a transport configurer run for channels carrying the voucher
    /// type.
    pub fn register_transport_configurer(
        &self,
        type_id: TypeIdentifier,
        configurer: Arc<dyn TransportConfigurer>,
    ) -> Result<(), ManagerError> {
        self.transport_configurers.register(
            type_id.clone(),
            conduit_registry::opaque_decoder(type_id),
            configurer,
        )?;
        Ok(())
    }

    // ========================================================================
    // Opening channels
    // ========================================================================

    /// Open a transfer that sends data to `to`.
    ///
    /// On send failure the record is moved to `Failing`, the monitor entry
    /// is torn down, and the error carries the channel id, which stays valid
    /// for inspection.
    pub async fn open_push_channel(
        &self,
        to: PeerId,
        voucher: TypedPayload,
        root: ContentId,
        selector: Selector,
    ) -> Result<ChannelId, ManagerError> {
        info!(%to, %root, "open push channel");

        if !self.validators.contains(&voucher.type_id) {
            return Err(ManagerError::UnknownVoucherType(voucher.type_id));
        }
        let tid = self.counter.next()?;

        // The record exists before the request leaves, so a response can
        // never race an unknown channel.
        let chid = self.channels.create_new(
            tid,
            root,
            selector.clone(),
            voucher.clone(),
            self.peer_id,
            self.peer_id,
            to,
        )?;

        self.run_transport_configurer(chid, &voucher);
        self.network.protect(to, chid.to_string());
        let monitored = self.monitor.add_channel(chid);

        let req = TransferRequest::New {
            transfer_id: tid,
            is_pull: false,
            root,
            selector,
            voucher,
            restart_channel: None,
        };
        if let Err(e) = self.network.send_message(to, req.into()).await {
            let reason = format!("unable to send request: {e}");
            if let Err(err) = self.channels.error(chid, reason.clone()) {
                warn!(%chid, error = %err, "recording open failure");
            }
            // The transfer never started; monitoring it would only restart
            // it forever.
            if let Some(monitored) = monitored {
                monitored.shutdown();
            }
            return Err(ManagerError::RequestNotSent { chid, reason });
        }

        Ok(chid)
    }

    /// Open a transfer that requests data from `to`.
    ///
    /// Pull channels open through the transport rather than a bare message,
    /// and are not watched by the push monitor.
    pub async fn open_pull_channel(
        &self,
        to: PeerId,
        voucher: TypedPayload,
        root: ContentId,
        selector: Selector,
    ) -> Result<ChannelId, ManagerError> {
        info!(%to, %root, "open pull channel");

        if !self.validators.contains(&voucher.type_id) {
            return Err(ManagerError::UnknownVoucherType(voucher.type_id));
        }
        let tid = self.counter.next()?;

        let chid = self.channels.create_new(
            tid,
            root,
            selector.clone(),
            voucher.clone(),
            self.peer_id,
            to,
            self.peer_id,
        )?;

        self.run_transport_configurer(chid, &voucher);
        self.network.protect(to, chid.to_string());

        let req = TransferRequest::New {
            transfer_id: tid,
            is_pull: true,
            root,
            selector: selector.clone(),
            voucher,
            restart_channel: None,
        };
        if let Err(e) = self
            .transport
            .open_channel(to, chid, root, selector, Vec::new(), req.into())
            .await
        {
            let reason = format!("unable to send request: {e}");
            if let Err(err) = self.channels.error(chid, reason.clone()) {
                warn!(%chid, error = %err, "recording open failure");
            }
            return Err(ManagerError::RequestNotSent { chid, reason });
        }

        Ok(chid)
    }

    // ========================================================================
    // Mid-transfer operations
    // ========================================================================

    /// Present a new voucher for an ongoing transfer (revalidation).
    ///
    /// Only the channel's initiator may do this.
    pub async fn send_voucher(
        &self,
        chid: ChannelId,
        voucher: TypedPayload,
    ) -> Result<(), ManagerError> {
        let record = self.channels.get_by_id(chid)?;
        if chid.initiator != self.peer_id {
            return Err(ManagerError::NotInitiator);
        }

        let req = TransferRequest::Voucher {
            transfer_id: chid.id,
            voucher: voucher.clone(),
        };
        if let Err(e) = self
            .network
            .send_message(record.other_party(self.peer_id), req.into())
            .await
        {
            self.on_disconnected(chid);
            return Err(ManagerError::Network(e));
        }

        self.channels.update(chid, ChannelEvent::NewVoucher(voucher))?;
        Ok(())
    }

    /// Pause a running channel on both the transport and the wire.
    ///
    /// Fails with [`ManagerError::Unsupported`] when the transport has no
    /// pause capability.
    pub async fn pause_channel(&self, chid: ChannelId) -> Result<(), ManagerError> {
        info!(%chid, "pause channel");

        let pausable = self.transport.pausable().ok_or(ManagerError::Unsupported)?;
        if let Err(e) = pausable.pause_channel(chid).await {
            warn!(%chid, error = %e, "pausing at transport level");
        }

        let req = TransferRequest::Update {
            transfer_id: chid.id,
            paused: true,
        };
        if let Err(e) = self
            .network
            .send_message(chid.other_party(self.peer_id), req.into())
            .await
        {
            self.on_disconnected(chid);
            return Err(ManagerError::Network(e));
        }

        self.channels.update(chid, self.local_pause_event(chid, true))?;
        Ok(())
    }

    /// Resume a paused channel. The resume message rides on the transport's
    /// own resumption.
    pub async fn resume_channel(&self, chid: ChannelId) -> Result<(), ManagerError> {
        info!(%chid, "resume channel");

        let pausable = self.transport.pausable().ok_or(ManagerError::Unsupported)?;
        let req = TransferRequest::Update {
            transfer_id: chid.id,
            paused: false,
        };
        if let Err(e) = pausable.resume_channel(chid, req.into()).await {
            warn!(%chid, error = %e, "resuming at transport level");
        }

        self.channels.update(chid, self.local_pause_event(chid, false))?;
        Ok(())
    }

    /// Close a channel: close the transport side, tell the peer, and cancel
    /// the state machine.
    ///
    /// Transport and messaging errors are logged; the state-machine error is
    /// authoritative, except that a failed cancel send is reported first.
    pub async fn close_channel(&self, chid: ChannelId) -> Result<(), ManagerError> {
        info!(%chid, "close channel");

        let record = self.channels.get_by_id(chid)?;

        if let Err(e) = self.transport.close_channel(chid).await {
            warn!(%chid, error = %e, "unable to close transport channel");
        }

        let cancel = TransferRequest::Cancel {
            transfer_id: chid.id,
        };
        let send_result = self
            .network
            .send_message(record.other_party(self.peer_id), cancel.into())
            .await;
        if let Err(e) = &send_result {
            warn!(%chid, error = %e, "unable to send cancel message");
            self.on_disconnected(chid);
        }

        let fsm_result = self
            .channels
            .cancel(chid)
            .and_then(|_| self.channels.update(chid, ChannelEvent::CleanupComplete).map(|_| ()));

        send_result.map_err(ManagerError::Network)?;
        fsm_result?;
        Ok(())
    }

    /// Close a channel recording `reason` as its error.
    ///
    /// Failures to close the transport or reach the peer are logged only, so
    /// they never mask the original error.
    pub async fn close_channel_with_error(
        &self,
        chid: ChannelId,
        reason: String,
    ) -> Result<(), ManagerError> {
        info!(%chid, %reason, "close channel with error");

        let record = self.channels.get_by_id(chid)?;

        if let Err(e) = self.transport.close_channel(chid).await {
            warn!(%chid, error = %e, "unable to close transport channel");
        }

        let cancel = TransferRequest::Cancel {
            transfer_id: chid.id,
        };
        if let Err(e) = self
            .network
            .send_message(record.other_party(self.peer_id), cancel.into())
            .await
        {
            // The channel is usually failing precisely because the peer is
            // unreachable; the original error must survive.
            warn!(%chid, error = %e, "unable to send cancel message");
        }

        self.channels.error(chid, reason)?;
        self.channels.update(chid, ChannelEvent::CleanupComplete)?;
        Ok(())
    }

    /// Restart a channel after a stall, disconnect or process restart.
    ///
    /// Terminal channels are left alone; cleaning-up channels are driven to
    /// their terminal; anything else is dispatched by role.
    pub async fn restart_channel(&self, chid: ChannelId) -> Result<(), ManagerError> {
        info!(%chid, "restart channel");

        let record = self.channels.get_by_id(chid)?;
        if record.status.is_terminated() {
            return Ok(());
        }
        if record.status.is_cleaning_up() {
            self.channels.complete_cleanup_on_restart(chid)?;
            return Ok(());
        }

        match self.channel_role(&record) {
            ChannelRole::PushCreator => self.open_push_restart(record).await,
            ChannelRole::PullCreator => self.open_pull_restart(record).await,
            ChannelRole::PushReceiver | ChannelRole::PullReceiver => {
                self.send_restart_request(record).await
            }
        }
    }

    // ========================================================================
    // Queries and subscriptions
    // ========================================================================

    /// The full record of a channel.
    pub fn channel_state(&self, chid: ChannelId) -> Result<ChannelRecord, ManagerError> {
        Ok(self.channels.get_by_id(chid)?)
    }

    /// The channel's status, or [`Status::ChannelNotFoundError`].
    pub fn transfer_status(&self, chid: ChannelId) -> Status {
        self.channels.status_of(chid)
    }

    /// All channels not yet terminal.
    pub fn in_progress_channels(
        &self,
    ) -> Result<HashMap<ChannelId, ChannelRecord>, ManagerError> {
        Ok(self.channels.in_progress()?)
    }

    /// Register an event listener; returns its unsubscribe.
    pub fn subscribe_to_events(&self, subscriber: Subscriber) -> Unsubscribe {
        self.events.subscribe(subscriber)
    }

    /// Signal that `peer` has reconnected, waking every channel waiting on
    /// it.
    pub fn on_peer_reconnected(&self, peer: PeerId) {
        let reconnects = self.reconnects.read();
        for (chid, notify) in reconnects.iter() {
            if chid.initiator == peer || chid.responder == peer {
                notify.notify_one();
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn channel_role(&self, record: &ChannelRecord) -> ChannelRole {
        match (record.is_pull, record.id.initiator == self.peer_id) {
            (false, true) => ChannelRole::PushCreator,
            (false, false) => ChannelRole::PushReceiver,
            (true, true) => ChannelRole::PullCreator,
            (true, false) => ChannelRole::PullReceiver,
        }
    }

    fn local_pause_event(&self, chid: ChannelId, pause: bool) -> ChannelEvent {
        match (chid.initiator == self.peer_id, pause) {
            (true, true) => ChannelEvent::PauseInitiator,
            (true, false) => ChannelEvent::ResumeInitiator,
            (false, true) => ChannelEvent::PauseResponder,
            (false, false) => ChannelEvent::ResumeResponder,
        }
    }

    /// The pause/resume event for an update received from `from`, named for
    /// the role that paused.
    pub(crate) fn remote_pause_event(
        &self,
        chid: ChannelId,
        from: PeerId,
        pause: bool,
    ) -> ChannelEvent {
        match (chid.initiator == from, pause) {
            (true, true) => ChannelEvent::PauseInitiator,
            (true, false) => ChannelEvent::ResumeInitiator,
            (false, true) => ChannelEvent::PauseResponder,
            (false, false) => ChannelEvent::ResumeResponder,
        }
    }

    fn run_transport_configurer(&self, chid: ChannelId, voucher: &TypedPayload) {
        if let Some(configurer) = self.transport_configurers.processor(&voucher.type_id) {
            configurer.configure(chid, voucher, self.transport.as_ref());
        }
    }

    /// Decoder for a voucher type: initial validators first, then
    /// revalidators.
    pub(crate) fn voucher_decoder(&self, type_id: &TypeIdentifier) -> Option<PayloadDecoder> {
        self.validators
            .decoder(type_id)
            .or_else(|| self.revalidators.decoder(type_id))
    }

    /// Decode an inbound voucher result, keeping the raw payload when no
    /// result type was registered.
    pub(crate) fn decode_voucher_result(&self, payload: TypedPayload) -> TypedPayload {
        match self.result_types.decoder(&payload.type_id) {
            Some(decoder) => match decoder(payload.payload.clone()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!(type_id = %payload.type_id, error = %e, "voucher result failed to decode, keeping raw payload");
                    payload
                }
            },
            None => payload,
        }
    }

    async fn open_push_restart(&self, record: ChannelRecord) -> Result<(), ManagerError> {
        let chid = record.id;
        self.channels.update(chid, ChannelEvent::Restart)?;

        let to = record.recipient;
        self.network.protect(to, chid.to_string());
        self.monitor.add_channel(chid);

        let req = TransferRequest::New {
            transfer_id: chid.id,
            is_pull: false,
            root: record.base_root,
            selector: record.selector.clone(),
            voucher: record.last_voucher().clone(),
            restart_channel: Some(chid),
        };
        if let Err(e) = self.network.send_message(to, req.into()).await {
            let reason = format!("unable to send restart request: {e}");
            if let Err(err) = self.channels.error(chid, reason.clone()) {
                warn!(%chid, error = %err, "recording restart failure");
            }
            return Err(ManagerError::RequestNotSent { chid, reason });
        }
        Ok(())
    }

    async fn open_pull_restart(&self, record: ChannelRecord) -> Result<(), ManagerError> {
        let chid = record.id;
        self.channels.update(chid, ChannelEvent::Restart)?;

        let to = record.sender;
        self.network.protect(to, chid.to_string());

        // The sender skips everything we already hold.
        let do_not_send = self.channels.received_cids(chid);
        debug!(%chid, skip = do_not_send.len(), "re-opening pull channel");

        let req = TransferRequest::New {
            transfer_id: chid.id,
            is_pull: true,
            root: record.base_root,
            selector: record.selector.clone(),
            voucher: record.last_voucher().clone(),
            restart_channel: Some(chid),
        };
        if let Err(e) = self
            .transport
            .open_channel(
                to,
                chid,
                record.base_root,
                record.selector.clone(),
                do_not_send,
                req.into(),
            )
            .await
        {
            let reason = format!("unable to send restart request: {e}");
            if let Err(err) = self.channels.error(chid, reason.clone()) {
                warn!(%chid, error = %err, "recording restart failure");
            }
            return Err(ManagerError::RequestNotSent { chid, reason });
        }
        Ok(())
    }

    async fn send_restart_request(&self, record: ChannelRecord) -> Result<(), ManagerError> {
        let chid = record.id;
        let to = record.other_party(self.peer_id);
        let req = TransferRequest::Restart { channel_id: chid };
        if let Err(e) = self.network.send_message(to, req.into()).await {
            self.on_disconnected(chid);
            return Err(ManagerError::Network(e));
        }
        Ok(())
    }

    /// A send to the channel's peer failed or its connection dropped: wait
    /// for the peer to come back within the grace period, then restart; fail
    /// the channel otherwise.
    pub(crate) fn on_disconnected(&self, chid: ChannelId) {
        let notify = {
            let mut reconnects = self.reconnects.write();
            if reconnects.contains_key(&chid) {
                // A wait is already in progress.
                return;
            }
            let notify = Arc::new(Notify::new());
            reconnects.insert(chid, Arc::clone(&notify));
            notify
        };

        debug!(%chid, grace = ?self.reconnect_grace, "peer disconnected, waiting for reconnect");

        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let handle = Arc::clone(&self.handle);
        let grace = self.reconnect_grace;
        runtime.spawn(async move {
            tokio::select! {
                _ = notify.notified() => {
                    debug!(%chid, "peer reconnected, restarting channel");
                    if let Some(manager) = handle.upgrade() {
                        if let Err(e) = manager.restart_channel(chid).await {
                            warn!(%chid, error = %e, "restart after reconnect failed");
                        }
                    }
                }
                _ = tokio::time::sleep(grace) => {
                    warn!(%chid, "peer did not reconnect in time, failing channel");
                    if let Some(manager) = handle.upgrade() {
                        if let Err(e) = manager.channels.error(chid, "peer disconnected") {
                            debug!(%chid, error = %e, "recording disconnect failure");
                        }
                    }
                }
            }
            if let Some(manager) = handle.upgrade() {
                manager.reconnects.write().remove(&chid);
            }
        });
    }

    /// Resolve the channel a message from `from` refers to: `from` may be
    /// the initiator (inbound requests) or the responder (updates and
    /// cancels flowing the other way).
    pub(crate) fn resolve_channel(
        &self,
        from: PeerId,
        tid: TransferId,
    ) -> Result<ChannelRecord, ChannelError> {
        let inbound = ChannelId::new(from, self.peer_id, tid);
        match self.channels.get_by_id(inbound) {
            Ok(record) => Ok(record),
            Err(ChannelError::NotFound(_)) => self
                .channels
                .get_by_id(ChannelId::new(self.peer_id, from, tid)),
            Err(e) => Err(e),
        }
    }

    /// The responder reported completion; fold it into the machine and
    /// finish if our side is already done.
    pub(crate) fn responder_completes(&self, chid: ChannelId) -> Result<(), ChannelError> {
        let record = self.channels.update(chid, ChannelEvent::ResponderCompletes)?;
        if record.status == Status::Completing {
            self.channels.update(chid, ChannelEvent::Complete)?;
        }
        Ok(())
    }

    /// The transport finished moving data for this channel.
    pub(crate) async fn complete_transfer(&self, chid: ChannelId) {
        let record = match self.channels.get_by_id(chid) {
            Ok(record) => record,
            Err(e) => {
                warn!(%chid, error = %e, "transport completed unknown channel");
                return;
            }
        };

        if chid.responder == self.peer_id {
            // Tell the initiator we are done before finishing locally.
            let resp = TransferResponse::completed(chid.id, None);
            if let Err(e) = self.network.send_message(chid.initiator, resp.into()).await {
                warn!(%chid, error = %e, "unable to send completion message");
            }

            let first = if record.sender == self.peer_id {
                // Pull responder: all data sent.
                ChannelEvent::FinishTransfer
            } else {
                // Push responder: all data received.
                ChannelEvent::ResponderCompletes
            };
            let result = self
                .channels
                .update(chid, first)
                .and_then(|_| self.channels.update(chid, ChannelEvent::BeginFinalizing))
                .and_then(|_| self.channels.update(chid, ChannelEvent::Complete));
            if let Err(e) = result {
                warn!(%chid, error = %e, "finalizing completed channel");
            }
        } else {
            // Initiator: our data is done; the responder's completion
            // message closes the loop, unless it already arrived.
            match self.channels.update(chid, ChannelEvent::FinishTransfer) {
                Ok(record) if record.status == Status::Completing => {
                    if let Err(e) = self.channels.update(chid, ChannelEvent::Complete) {
                        warn!(%chid, error = %e, "completing channel");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(%chid, error = %e, "finishing transfer"),
            }
        }
    }

    /// Handle an inbound opening request; returns the verdict to put in the
    /// response.
    pub(crate) async fn accept_new_request(
        &self,
        from: PeerId,
        tid: TransferId,
        is_pull: bool,
        root: ContentId,
        selector: Selector,
        voucher: TypedPayload,
    ) -> Result<Validation, String> {
        let decoder = self
            .voucher_decoder(&voucher.type_id)
            .ok_or_else(|| format!("unknown voucher type {}", voucher.type_id))?;
        let voucher = decoder(voucher.payload).map_err(|e| e.to_string())?;

        let validator = self
            .validators
            .processor(&voucher.type_id)
            .ok_or_else(|| format!("no validator for voucher type {}", voucher.type_id))?;

        let (sender, recipient) = if is_pull {
            (self.peer_id, from)
        } else {
            (from, self.peer_id)
        };
        let chid = self
            .channels
            .create_new(
                tid,
                root,
                selector.clone(),
                voucher.clone(),
                from,
                sender,
                recipient,
            )
            .map_err(|e| e.to_string())?;

        let verdict = if is_pull {
            validator.validate_pull(from, &voucher, root, &selector).await
        } else {
            validator.validate_push(from, &voucher, root, &selector).await
        };

        match verdict {
            Err(rejected) => {
                if let Err(e) = self.channels.error(chid, rejected.to_string()) {
                    warn!(%chid, error = %e, "recording validation rejection");
                }
                Err(rejected.to_string())
            }
            Ok(validation) => {
                self.run_transport_configurer(chid, &voucher);
                self.network.protect(from, chid.to_string());
                self.apply_validation(chid, &validation).map_err(|e| e.to_string())?;
                Ok(validation)
            }
        }
    }

    /// Record a validation verdict on the channel: accept, then any result,
    /// then the responder pause.
    pub(crate) fn apply_validation(
        &self,
        chid: ChannelId,
        validation: &Validation,
    ) -> Result<(), ChannelError> {
        self.channels.update(chid, ChannelEvent::Accept)?;
        if let Some(result) = validation.result() {
            self.channels
                .update(chid, ChannelEvent::NewVoucherResult(result.clone()))?;
        }
        if validation.is_paused() {
            self.channels.update(chid, ChannelEvent::PauseResponder)?;
        }
        Ok(())
    }

    /// Handle an opening request that restarts an existing channel.
    pub(crate) async fn accept_restart_request(
        &self,
        from: PeerId,
        chid: ChannelId,
        voucher: TypedPayload,
    ) -> Result<(), String> {
        let record = self
            .channels
            .get_by_id(chid)
            .map_err(|e| e.to_string())?;
        if chid.initiator != from || record.other_party(self.peer_id) != from {
            return Err(format!("restart request for {chid} from wrong peer {from}"));
        }
        if record.status.is_terminated() {
            return Err(format!("channel {chid} is already terminated"));
        }

        let decoder = self
            .voucher_decoder(&voucher.type_id)
            .ok_or_else(|| format!("unknown voucher type {}", voucher.type_id))?;
        let voucher = decoder(voucher.payload).map_err(|e| e.to_string())?;

        // A restart may carry a renewed voucher; re-judge it and keep the
        // history straight.
        let validator = self
            .validators
            .processor(&voucher.type_id)
            .ok_or_else(|| format!("no validator for voucher type {}", voucher.type_id))?;
        let verdict = if record.is_pull {
            validator
                .validate_pull(from, &voucher, record.base_root, &record.selector)
                .await
        } else {
            validator
                .validate_push(from, &voucher, record.base_root, &record.selector)
                .await
        };
        if let Err(rejected) = verdict {
            if let Err(e) = self.channels.error(chid, rejected.to_string()) {
                warn!(%chid, error = %e, "recording restart rejection");
            }
            return Err(rejected.to_string());
        }

        if &voucher != record.last_voucher() {
            self.channels
                .update(chid, ChannelEvent::NewVoucher(voucher))
                .map_err(|e| e.to_string())?;
        }
        self.channels
            .update(chid, ChannelEvent::Restart)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Handle an inbound restart request: the remote wants us to re-open the
    /// channel from our side.
    pub(crate) async fn handle_restart_request(&self, from: PeerId, chid: ChannelId) {
        let record = match self.channels.get_by_id(chid) {
            Ok(record) => record,
            Err(e) => {
                warn!(%chid, error = %e, "restart request for unknown channel");
                return;
            }
        };
        if record.other_party(self.peer_id) != from {
            warn!(%chid, %from, "ignoring restart request from peer not on the channel");
            return;
        }
        if let Err(e) = self.restart_channel(chid).await {
            warn!(%chid, error = %e, "restart requested by peer failed");
        }
    }

    /// Handle an inbound revalidation voucher.
    pub(crate) async fn handle_voucher_request(
        &self,
        chid: ChannelId,
        voucher: TypedPayload,
    ) -> Result<Validation, String> {
        let revalidator = self
            .revalidators
            .processor(&voucher.type_id)
            .ok_or_else(|| format!("no revalidator for voucher type {}", voucher.type_id))?;
        let decoder = self
            .voucher_decoder(&voucher.type_id)
            .ok_or_else(|| format!("unknown voucher type {}", voucher.type_id))?;
        let voucher = decoder(voucher.payload).map_err(|e| e.to_string())?;

        match revalidator.revalidate(chid, &voucher).await {
            Err(rejected) => {
                if let Err(e) = self.channels.error(chid, rejected.to_string()) {
                    warn!(%chid, error = %e, "recording revalidation rejection");
                }
                Err(rejected.to_string())
            }
            Ok(validation) => {
                let apply = self
                    .channels
                    .update(chid, ChannelEvent::NewVoucher(voucher))
                    .and_then(|_| {
                        if let Some(result) = validation.result() {
                            self.channels
                                .update(chid, ChannelEvent::NewVoucherResult(result.clone()))?;
                        }
                        if validation.is_paused() {
                            self.channels.update(chid, ChannelEvent::PauseResponder)?;
                        }
                        Ok(())
                    });
                apply.map_err(|e| e.to_string())?;
                Ok(validation)
            }
        }
    }
}

// The monitor's narrow view and the reconnect task both reach the manager
// through `ManagerHandle`, defined in `handle.rs`.

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_api::{NetworkError, ValidationRejected};
    use conduit_channels::MemoryRecordStore;
    use conduit_messages::TransferMessage;
    use conduit_registry::opaque_decoder;
    use parking_lot::Mutex;

    struct NullNetwork {
        peer: PeerId,
    }

    #[async_trait]
    impl TransferNetwork for NullNetwork {
        fn local_peer(&self) -> PeerId {
            self.peer
        }
        async fn send_message(
            &self,
            _to: PeerId,
            _msg: TransferMessage,
        ) -> Result<(), NetworkError> {
            Ok(())
        }
        fn protect(&self, _peer: PeerId, _tag: String) {}
        fn unprotect(&self, _peer: PeerId, _tag: String) {}
        fn set_delegate(&self, _receiver: Arc<dyn MessageReceiver>) {}
    }

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn open_channel(
            &self,
            _to: PeerId,
            _chid: ChannelId,
            _root: ContentId,
            _selector: Selector,
            _do_not_send: Vec<ContentId>,
            _msg: TransferMessage,
        ) -> Result<(), conduit_api::TransportError> {
            Ok(())
        }
        async fn close_channel(
            &self,
            _chid: ChannelId,
        ) -> Result<(), conduit_api::TransportError> {
            Ok(())
        }
        fn set_event_handler(&self, _handler: Arc<dyn TransportEvents>) {}
        async fn shutdown(&self) {}
    }

    struct AcceptAll;

    #[async_trait]
    impl RequestValidator for AcceptAll {
        async fn validate_push(
            &self,
            _sender: PeerId,
            _voucher: &TypedPayload,
            _root: ContentId,
            _selector: &Selector,
        ) -> Result<Validation, ValidationRejected> {
            Ok(Validation::Accepted { result: None })
        }
        async fn validate_pull(
            &self,
            _recipient: PeerId,
            _voucher: &TypedPayload,
            _root: ContentId,
            _selector: &Selector,
        ) -> Result<Validation, ValidationRejected> {
            Ok(Validation::Accepted { result: None })
        }
    }

    fn test_manager(dir: &tempfile::TempDir) -> Arc<Manager> {
        let network = Arc::new(NullNetwork {
            peer: PeerId::random(),
        });
        Manager::new(
            Arc::new(MemoryRecordStore::new()),
            dir.path().join("cidlists"),
            dir.path().join("counter"),
            network,
            Arc::new(NullTransport),
            ManagerOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn open_push_requires_registered_voucher_type() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(&dir);

        let err = manager
            .open_push_channel(
                PeerId::random(),
                TypedPayload::new("test/unregistered", vec![1]),
                ContentId::new([1u8; 32]),
                Selector::all(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::UnknownVoucherType(_)));
    }

    #[tokio::test]
    async fn duplicate_voucher_registration_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(&dir);
        let type_id = TypeIdentifier::new("test/voucher");

        manager
            .register_voucher_type(
                type_id.clone(),
                opaque_decoder(type_id.clone()),
                Arc::new(AcceptAll),
            )
            .unwrap();
        let err = manager
            .register_voucher_type(
                type_id.clone(),
                opaque_decoder(type_id),
                Arc::new(AcceptAll),
            )
            .unwrap_err();
        assert!(matches!(err, ManagerError::Registry(_)));
    }

    #[tokio::test]
    async fn send_voucher_requires_initiator() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(&dir);

        // A channel someone else initiated towards us.
        let remote = PeerId::random();
        let chid = manager
            .channels
            .create_new(
                TransferId(1),
                ContentId::new([1u8; 32]),
                Selector::all(),
                TypedPayload::new("test/voucher", vec![1]),
                remote,
                remote,
                manager.local_peer(),
            )
            .unwrap();

        let err = manager
            .send_voucher(chid, TypedPayload::new("test/voucher", vec![2]))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::NotInitiator));
    }

    #[tokio::test]
    async fn pause_without_capability_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(&dir);
        let chid = ChannelId::new(manager.local_peer(), PeerId::random(), TransferId(1));

        let err = manager.pause_channel(chid).await.unwrap_err();
        assert!(matches!(err, ManagerError::Unsupported));
    }

    #[tokio::test]
    async fn transfer_status_sentinel_for_unknown_channel() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(&dir);
        let chid = ChannelId::new(PeerId::random(), PeerId::random(), TransferId(9));
        assert_eq!(manager.transfer_status(chid), Status::ChannelNotFoundError);
    }

    #[tokio::test]
    async fn ready_event_fires_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(&dir);

        let ready = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&ready);
        manager.on_ready(Box::new(move |err| *sink.lock() = Some(err)));

        manager.start().await;
        // Recovery runs on a spawned task.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*ready.lock(), Some(None));
    }
}
