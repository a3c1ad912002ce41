//! Inbound message dispatch.
//!
//! The manager installs a [`Receiver`] as the network delegate; every
//! inbound request and response is translated here into state-machine events
//! and, where the message calls for one, a response back to the peer.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p_identity::PeerId;
use tracing::{debug, warn};

use conduit_api::{MessageReceiver, NetworkError, Validation};
use conduit_messages::{TransferRequest, TransferResponse};
use conduit_primitives::{ChannelEvent, ChannelId, Status, TransferId, TypedPayload};

use crate::manager::Manager;

/// The network delegate: routes inbound messages into the manager.
pub struct Receiver {
    manager: Arc<Manager>,
}

impl Receiver {
    pub(crate) fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    async fn reply(&self, to: PeerId, response: TransferResponse) {
        if let Err(e) = self
            .manager
            .network()
            .send_message(to, response.into())
            .await
        {
            warn!(%to, error = %e, "unable to send response");
        }
    }

    fn response_for(tid: TransferId, verdict: &Validation) -> TransferResponse {
        match verdict {
            Validation::Accepted { result } => TransferResponse::accepted(tid, result.clone()),
            Validation::Paused { result } => TransferResponse::paused(tid, result.clone()),
        }
    }

    async fn handle_new(
        &self,
        from: PeerId,
        tid: TransferId,
        is_pull: bool,
        root: conduit_primitives::ContentId,
        selector: conduit_primitives::Selector,
        voucher: TypedPayload,
        restart_channel: Option<ChannelId>,
    ) {
        if let Some(chid) = restart_channel {
            let response = match self.manager.accept_restart_request(from, chid, voucher).await {
                Ok(()) => TransferResponse::accepted(tid, None),
                Err(reason) => {
                    warn!(%chid, %from, %reason, "rejecting restart request");
                    TransferResponse::error(tid, reason)
                }
            };
            self.reply(from, response).await;
            return;
        }

        let response = match self
            .manager
            .accept_new_request(from, tid, is_pull, root, selector, voucher)
            .await
        {
            Ok(verdict) => Self::response_for(tid, &verdict),
            Err(reason) => {
                warn!(%from, %tid, %reason, "rejecting transfer request");
                TransferResponse::error(tid, reason)
            }
        };
        self.reply(from, response).await;
    }

    async fn handle_voucher(&self, from: PeerId, tid: TransferId, voucher: TypedPayload) {
        let record = match self.manager.resolve_channel(from, tid) {
            Ok(record) => record,
            Err(e) => {
                warn!(%from, %tid, error = %e, "voucher for unknown channel");
                return;
            }
        };
        let chid = record.id;
        let response = match self.manager.handle_voucher_request(chid, voucher).await {
            Ok(verdict) => Self::response_for(tid, &verdict),
            Err(reason) => TransferResponse::error(tid, reason),
        };
        self.reply(from, response).await;
    }

    async fn handle_cancel(&self, from: PeerId, tid: TransferId) {
        let record = match self.manager.resolve_channel(from, tid) {
            Ok(record) => record,
            Err(e) => {
                debug!(%from, %tid, error = %e, "cancel for unknown channel");
                return;
            }
        };
        let chid = record.id;
        if let Err(e) = self.manager.transport().close_channel(chid).await {
            warn!(%chid, error = %e, "unable to close transport channel on cancel");
        }
        let result = self
            .manager
            .channels
            .cancel(chid)
            .and_then(|_| {
                self.manager
                    .channels
                    .update(chid, ChannelEvent::CleanupComplete)
                    .map(|_| ())
            });
        if let Err(e) = result {
            warn!(%chid, error = %e, "cancelling channel");
        }
    }

    async fn handle_update(&self, from: PeerId, tid: TransferId, paused: bool) {
        let record = match self.manager.resolve_channel(from, tid) {
            Ok(record) => record,
            Err(e) => {
                warn!(%from, %tid, error = %e, "update for unknown channel");
                return;
            }
        };
        let chid = record.id;
        let event = self.manager.remote_pause_event(chid, from, paused);
        if let Err(e) = self.manager.channels.update(chid, event) {
            warn!(%chid, error = %e, "applying pause update");
        }
    }
}

#[async_trait]
impl MessageReceiver for Receiver {
    async fn receive_request(&self, from: PeerId, request: TransferRequest) {
        debug!(%from, kind = request.name(), "inbound request");
        match request {
            TransferRequest::New {
                transfer_id,
                is_pull,
                root,
                selector,
                voucher,
                restart_channel,
            } => {
                self.handle_new(
                    from,
                    transfer_id,
                    is_pull,
                    root,
                    selector,
                    voucher,
                    restart_channel,
                )
                .await
            }
            TransferRequest::Restart { channel_id } => {
                self.manager.handle_restart_request(from, channel_id).await
            }
            TransferRequest::Cancel { transfer_id } => {
                self.handle_cancel(from, transfer_id).await
            }
            TransferRequest::Update {
                transfer_id,
                paused,
            } => self.handle_update(from, transfer_id, paused).await,
            TransferRequest::Voucher {
                transfer_id,
                voucher,
            } => self.handle_voucher(from, transfer_id, voucher).await,
        }
    }

    async fn receive_response(&self, from: PeerId, response: TransferResponse) {
        debug!(%from, tid = %response.transfer_id, accepted = response.accepted, completed = response.completed, "inbound response");

        // Responses flow responder → initiator, so the channel is ours.
        let chid = ChannelId::new(self.manager.local_peer(), from, response.transfer_id);

        if let Some(result) = response.voucher_result {
            let result = self.manager.decode_voucher_result(result);
            if let Err(e) = self
                .manager
                .channels
                .update(chid, ChannelEvent::NewVoucherResult(result))
            {
                warn!(%chid, error = %e, "recording voucher result");
            }
        }

        if let Some(message) = response.error_message {
            if let Err(e) = self.manager.channels.error(chid, message) {
                warn!(%chid, error = %e, "recording peer-reported failure");
            }
            return;
        }

        if response.completed {
            if let Err(e) = self.manager.responder_completes(chid) {
                warn!(%chid, error = %e, "recording responder completion");
            }
            return;
        }

        if response.accepted {
            if let Err(e) = self.manager.channels.update(chid, ChannelEvent::Accept) {
                warn!(%chid, error = %e, "recording accept");
            }
            if response.paused {
                if let Err(e) = self
                    .manager
                    .channels
                    .update(chid, ChannelEvent::PauseResponder)
                {
                    warn!(%chid, error = %e, "recording responder pause");
                }
            }
        } else if self.manager.transfer_status(chid) != Status::ChannelNotFoundError {
            if let Err(e) = self.manager.channels.error(chid, "request rejected") {
                warn!(%chid, error = %e, "recording rejection");
            }
        }
    }

    fn receive_error(&self, error: NetworkError) {
        warn!(error = %error, "network receive error");
    }
}
