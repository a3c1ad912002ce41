//! In-memory fakes wiring two managers together for end-to-end scenarios.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use libp2p_identity::PeerId;
use parking_lot::Mutex;

use conduit_api::{
    MessageReceiver, NetworkError, PausableTransport, RequestValidator, Revalidator, Transport,
    TransportError, TransportEvents, TransferNetwork, Validation, ValidationRejected,
};
use conduit_channels::FileRecordStore;
use conduit_manager::{Manager, ManagerOptions};
use conduit_messages::{TransferMessage, TransferRequest};
use conduit_primitives::{ChannelId, ContentId, Selector, TypeIdentifier, TypedPayload};
use conduit_registry::opaque_decoder;

pub const VOUCHER_TYPE: &str = "app/voucher";

pub fn voucher_type() -> TypeIdentifier {
    TypeIdentifier::new(VOUCHER_TYPE)
}

pub fn voucher(n: u8) -> TypedPayload {
    TypedPayload::new(VOUCHER_TYPE, vec![n])
}

pub fn cid(n: u8) -> ContentId {
    ContentId::new([n; 32])
}

pub fn root() -> ContentId {
    cid(0xAA)
}

/// Let directly-dispatched messages and spawned tasks drain.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Message hub
// ============================================================================

/// Routes messages between the fake networks of all peers in a test.
#[derive(Default)]
pub struct Hub {
    receivers: Mutex<HashMap<PeerId, Arc<dyn MessageReceiver>>>,
    /// Every message offered to the hub: (from, to, message).
    pub log: Mutex<Vec<(PeerId, PeerId, TransferMessage)>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn network(self: &Arc<Self>, peer: PeerId) -> Arc<HubNetwork> {
        Arc::new(HubNetwork {
            peer,
            hub: Arc::clone(self),
            drop_outbound: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            protected: Mutex::new(Vec::new()),
        })
    }

    pub fn receiver_of(&self, peer: PeerId) -> Option<Arc<dyn MessageReceiver>> {
        self.receivers.lock().get(&peer).cloned()
    }

    /// Count of restart-flavoured opening requests seen on the wire.
    pub fn restart_request_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(_, _, msg)| {
                matches!(
                    msg,
                    TransferMessage::Request(TransferRequest::New {
                        restart_channel: Some(_),
                        ..
                    }) | TransferMessage::Request(TransferRequest::Restart { .. })
                )
            })
            .count()
    }

    async fn dispatch(&self, from: PeerId, to: PeerId, msg: TransferMessage) {
        let receiver = self.receiver_of(to);
        if let Some(receiver) = receiver {
            match msg {
                TransferMessage::Request(req) => receiver.receive_request(from, req).await,
                TransferMessage::Response(resp) => receiver.receive_response(from, resp).await,
            }
        }
    }
}

/// One peer's view of the hub.
pub struct HubNetwork {
    peer: PeerId,
    hub: Arc<Hub>,
    /// Sends succeed but the message never arrives (silent peer).
    pub drop_outbound: AtomicBool,
    /// Sends fail outright (disconnected peer).
    pub fail_sends: AtomicBool,
    pub protected: Mutex<Vec<(PeerId, String)>>,
}

#[async_trait]
impl TransferNetwork for HubNetwork {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    async fn send_message(&self, to: PeerId, msg: TransferMessage) -> Result<(), NetworkError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NetworkError::SendFailed {
                peer: to,
                reason: "connection refused".into(),
            });
        }
        self.hub.log.lock().push((self.peer, to, msg.clone()));
        if self.drop_outbound.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.hub.dispatch(self.peer, to, msg).await;
        Ok(())
    }

    fn protect(&self, peer: PeerId, tag: String) {
        self.protected.lock().push((peer, tag));
    }

    fn unprotect(&self, peer: PeerId, tag: String) {
        self.protected.lock().retain(|(p, t)| !(*p == peer && *t == tag));
    }

    fn set_delegate(&self, receiver: Arc<dyn MessageReceiver>) {
        self.hub.receivers.lock().insert(self.peer, receiver);
    }
}

// ============================================================================
// Fake transport
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenCall {
    pub to: PeerId,
    pub chid: ChannelId,
    pub do_not_send: Vec<ContentId>,
}

/// A transport that records every call and forwards piggybacked open and
/// resume messages through the hub, like a real transport delivers them in
/// its own opening exchange.
pub struct FakeTransport {
    peer: PeerId,
    hub: Arc<Hub>,
    pub handler: Mutex<Option<Arc<dyn TransportEvents>>>,
    pub opened: Mutex<Vec<OpenCall>>,
    pub closed: Mutex<Vec<ChannelId>>,
    pub paused: Mutex<Vec<ChannelId>>,
    pub resumed: Mutex<Vec<ChannelId>>,
    pub fail_open: AtomicBool,
}

impl FakeTransport {
    pub fn wired(hub: Arc<Hub>, peer: PeerId) -> Arc<Self> {
        Arc::new(Self {
            peer,
            hub,
            handler: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
        })
    }

    /// The event sink the manager installed at start.
    pub fn events(&self) -> Arc<dyn TransportEvents> {
        self.handler
            .lock()
            .clone()
            .expect("manager not started: no transport event handler installed")
    }

    pub fn last_open(&self) -> OpenCall {
        self.opened.lock().last().cloned().expect("no open_channel call recorded")
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_channel(
        &self,
        to: PeerId,
        chid: ChannelId,
        _root: ContentId,
        _selector: Selector,
        do_not_send: Vec<ContentId>,
        msg: TransferMessage,
    ) -> Result<(), TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("dial failed".into()));
        }
        self.opened.lock().push(OpenCall {
            to,
            chid,
            do_not_send,
        });
        self.hub.log.lock().push((self.peer, to, msg.clone()));
        self.hub.dispatch(self.peer, to, msg).await;
        Ok(())
    }

    async fn close_channel(&self, chid: ChannelId) -> Result<(), TransportError> {
        self.closed.lock().push(chid);
        Ok(())
    }

    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) {
        *self.handler.lock() = Some(handler);
    }

    async fn shutdown(&self) {}

    fn pausable(&self) -> Option<&dyn PausableTransport> {
        Some(self)
    }
}

#[async_trait]
impl PausableTransport for FakeTransport {
    async fn pause_channel(&self, chid: ChannelId) -> Result<(), TransportError> {
        self.paused.lock().push(chid);
        Ok(())
    }

    async fn resume_channel(
        &self,
        chid: ChannelId,
        msg: TransferMessage,
    ) -> Result<(), TransportError> {
        self.resumed.lock().push(chid);
        let to = chid.other_party(self.peer);
        self.hub.log.lock().push((self.peer, to, msg.clone()));
        self.hub.dispatch(self.peer, to, msg).await;
        Ok(())
    }
}

// ============================================================================
// Validators
// ============================================================================

pub struct AcceptAll;

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

#[async_trait]
impl Revalidator for AcceptAll {
    async fn revalidate(
        &self,
        _chid: ChannelId,
        _voucher: &TypedPayload,
    ) -> Result<Validation, ValidationRejected> {
        Ok(Validation::Accepted { result: None })
    }
}

pub struct RejectAll;

#[async_trait]
impl RequestValidator for RejectAll {
    async fn validate_push(
        &self,
        _sender: PeerId,
        _voucher: &TypedPayload,
        _root: ContentId,
        _selector: &Selector,
    ) -> Result<Validation, ValidationRejected> {
        Err(ValidationRejected("voucher refused".into()))
    }

    async fn validate_pull(
        &self,
        _recipient: PeerId,
        _voucher: &TypedPayload,
        _root: ContentId,
        _selector: &Selector,
    ) -> Result<Validation, ValidationRejected> {
        Err(ValidationRejected("voucher refused".into()))
    }
}

// ============================================================================
// Peer harness
// ============================================================================

pub struct Peer {
    pub peer: PeerId,
    pub manager: Arc<Manager>,
    pub network: Arc<HubNetwork>,
    pub transport: Arc<FakeTransport>,
    _tmp: Option<tempfile::TempDir>,
}

pub async fn make_peer(hub: &Arc<Hub>, options: ManagerOptions) -> Peer {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_path_buf();
    let mut peer = spawn_peer(hub, options, PeerId::random(), &dir, true).await;
    peer._tmp = Some(tmp);
    peer
}

pub async fn make_rejecting_peer(hub: &Arc<Hub>, options: ManagerOptions) -> Peer {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_path_buf();
    let mut peer = spawn_peer(hub, options, PeerId::random(), &dir, false).await;
    peer.manager
        .register_voucher_type(
            voucher_type(),
            opaque_decoder(voucher_type()),
            Arc::new(RejectAll),
        )
        .unwrap();
    peer._tmp = Some(tmp);
    peer
}

/// Build and start a manager for `peer` with state rooted at `dir`.
///
/// Reusing the same `peer` and `dir` simulates a process restart over the
/// same on-disk state.
pub async fn spawn_peer(
    hub: &Arc<Hub>,
    options: ManagerOptions,
    peer: PeerId,
    dir: &Path,
    accept_all: bool,
) -> Peer {
    let store = Arc::new(
        FileRecordStore::new_with_create_dir(dir.join("channels.json")).unwrap(),
    );
    let network = hub.network(peer);
    let transport = FakeTransport::wired(Arc::clone(hub), peer);
    let manager = Manager::new(
        store,
        dir.join("cidlists"),
        dir.join("counter"),
        network.clone(),
        transport.clone(),
        options,
    )
    .unwrap();

    if accept_all {
        manager
            .register_voucher_type(
                voucher_type(),
                opaque_decoder(voucher_type()),
                Arc::new(AcceptAll),
            )
            .unwrap();
        manager
            .register_revalidator(
                voucher_type(),
                opaque_decoder(voucher_type()),
                Arc::new(AcceptAll),
            )
            .unwrap();
    }

    manager.start().await;
    settle().await;

    Peer {
        peer,
        manager,
        network,
        transport,
        _tmp: None,
    }
}
