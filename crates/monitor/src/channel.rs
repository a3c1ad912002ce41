//! Per-channel watchdog state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info};

use conduit_api::Unsubscribe;
use conduit_primitives::{ChannelEvent, ChannelId, ChannelRecord};

use crate::api::MonitorApi;
use crate::config::MonitorConfig;

/// One sample of the data-rate window: what was pending and what had been
/// sent at observation time.
#[derive(Debug, Clone, Copy)]
struct DataRatePoint {
    pending: u64,
    sent: u64,
}

#[derive(Default)]
struct Stats {
    queued: u64,
    sent: u64,
    points: VecDeque<DataRatePoint>,
    consecutive_restarts: u32,
}

/// Registry the channel removes itself from on shutdown.
pub(crate) type ChannelSet = Arc<RwLock<HashMap<ChannelId, Arc<MonitoredChannel>>>>;

/// Watchdog over a single push channel.
///
/// Tracks the channel's data rate, restarts it when the sender stalls, and
/// enforces the accept and complete timeouts.
pub struct MonitoredChannel {
    api: Arc<dyn MonitorApi>,
    chid: ChannelId,
    cfg: MonitorConfig,
    stats: Mutex<Stats>,
    /// Set while a restart is in flight; concurrent attempts short-circuit.
    restarted_at: Mutex<Option<Instant>>,
    /// Fired when the responder's accept arrives; cancels the accept timer.
    accepted: Notify,
    shutdown_tx: watch::Sender<bool>,
    shut_down: AtomicBool,
    unsub: Mutex<Option<Unsubscribe>>,
    registry: Weak<RwLock<HashMap<ChannelId, Arc<MonitoredChannel>>>>,
}

impl MonitoredChannel {
    pub(crate) fn new(
        api: Arc<dyn MonitorApi>,
        chid: ChannelId,
        cfg: MonitorConfig,
        registry: &ChannelSet,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let mc = Arc::new(Self {
            api,
            chid,
            cfg,
            stats: Mutex::new(Stats::default()),
            restarted_at: Mutex::new(None),
            accepted: Notify::new(),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            unsub: Mutex::new(None),
            registry: Arc::downgrade(registry),
        });
        mc.start();
        mc
    }

    /// The channel under watch.
    pub fn channel_id(&self) -> ChannelId {
        self.chid
    }

    fn start(self: &Arc<Self>) {
        debug!(chid = %self.chid, "starting push channel data-rate monitoring");

        self.watch_for_responder_accept();

        let this = Arc::clone(self);
        let unsub = self
            .api
            .subscribe(Arc::new(move |event, state| this.on_event(event, state)));
        *self.unsub.lock() = Some(unsub);
    }

    /// Cancel all watchdog tasks and deregister from the monitor.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(unsub) = self.unsub.lock().take() {
            unsub();
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.chid);
        }
    }

    /// Returns true once the watchdog has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn on_event(self: &Arc<Self>, event: &ChannelEvent, state: &ChannelRecord) {
        if state.id != self.chid {
            return;
        }

        // Once the channel winds down there is nothing left to watch.
        let status = state.status;
        if status.is_cleaning_up() || status.is_terminated() {
            debug!(chid = %self.chid, %status, "stopping push channel data-rate monitoring");
            self.shutdown();
            return;
        }

        match event {
            ChannelEvent::Accept => {
                self.accepted.notify_one();
            }
            ChannelEvent::Error { .. } => {
                debug!(chid = %self.chid, "data transfer error, restarting");
                self.spawn_restart();
            }
            ChannelEvent::DataQueued { .. } => {
                self.stats.lock().queued = state.queued;
            }
            ChannelEvent::DataSent { .. } => {
                let mut stats = self.stats.lock();
                stats.sent = state.sent;
                // Progress was made; the restart budget refills.
                stats.consecutive_restarts = 0;
            }
            ChannelEvent::FinishTransfer => {
                self.watch_for_responder_complete();
            }
            _ => {}
        }
    }

    /// Make sure the responder accepts the channel before the accept
    /// timeout.
    fn watch_for_responder_accept(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handle.spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = this.accepted.notified() => {}
                _ = tokio::time::sleep(this.cfg.accept_timeout) => {
                    let reason = format!(
                        "{}: timed out waiting {:?} for Accept message from remote peer",
                        this.chid, this.cfg.accept_timeout
                    );
                    this.close_channel_and_shutdown(reason).await;
                }
            }
        });
    }

    /// Wait up to the configured timeout for the responder's completion
    /// message. The shutdown signal doubles as the cancel: completion drives
    /// the channel terminal, which shuts this watchdog down.
    fn watch_for_responder_complete(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handle.spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(this.cfg.complete_timeout) => {
                    let reason = format!(
                        "{}: timed out waiting {:?} for Complete message from remote peer",
                        this.chid, this.cfg.complete_timeout
                    );
                    this.close_channel_and_shutdown(reason).await;
                }
            }
        });
    }

    /// One tick of the sliding-window data-rate check.
    ///
    /// Pops the sample from one interval ago; if the sender had enough
    /// buffered data then but transmitted less than the minimum since, the
    /// channel is restarted. The current sample is pushed either way.
    pub(crate) fn check_data_rate(self: &Arc<Self>) {
        let restart = {
            let mut stats = self.stats.lock();
            let pending = stats.queued.saturating_sub(stats.sent);
            let sent = stats.sent;

            // Only pop once a full interval's worth of samples has built up.
            let window_full = stats.points.len() >= self.cfg.checks_per_interval as usize;
            let restart = if !window_full {
                debug!(
                    chid = %self.chid,
                    have = stats.points.len(),
                    need = self.cfg.checks_per_interval,
                    "not enough data points to check data rate yet"
                );
                false
            } else if let Some(at_interval_start) = stats.points.pop_front() {
                let sent_in_interval = sent.saturating_sub(at_interval_start.sent);
                debug!(
                    chid = %self.chid,
                    sent_in_interval,
                    pending = at_interval_start.pending,
                    required = self.cfg.min_bytes_sent,
                    "data rate check"
                );
                at_interval_start.pending > sent_in_interval
                    && sent_in_interval < self.cfg.min_bytes_sent
            } else {
                false
            };

            stats.points.push_back(DataRatePoint { pending, sent });
            restart
        };

        if restart {
            self.spawn_restart();
        }
    }

    fn spawn_restart(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let this = Arc::clone(self);
        handle.spawn(async move { this.restart_channel().await });
    }

    async fn restart_channel(self: Arc<Self>) {
        // Short-circuit concurrent restart attempts.
        {
            let mut restarted = self.restarted_at.lock();
            if let Some(since) = *restarted {
                debug!(
                    chid = %self.chid,
                    elapsed = ?since.elapsed(),
                    backoff = ?self.cfg.restart_backoff,
                    "restart called but channel is already restarting"
                );
                return;
            }
            *restarted = Some(Instant::now());
        }

        let restart_count = {
            let mut stats = self.stats.lock();
            stats.consecutive_restarts += 1;
            stats.consecutive_restarts
        };

        if restart_count > self.cfg.max_consecutive_restarts {
            let reason = format!(
                "{}: after {} consecutive restarts failed to reach required data transfer rate",
                self.chid, restart_count
            );
            self.close_channel_and_shutdown(reason).await;
            return;
        }

        info!(chid = %self.chid, restart_count, "sending restart message");
        match self.api.restart_channel(self.chid).await {
            Err(e) => {
                let reason = format!("{}: failed to send restart message: {}", self.chid, e);
                self.close_channel_and_shutdown(reason).await;
            }
            Ok(()) => {
                if !self.cfg.restart_backoff.is_zero() {
                    debug!(
                        chid = %self.chid,
                        backoff = ?self.cfg.restart_backoff,
                        "restart sent, backing off before allowing another"
                    );
                    let mut shutdown_rx = self.shutdown_tx.subscribe();
                    tokio::select! {
                        _ = tokio::time::sleep(self.cfg.restart_backoff) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }

        *self.restarted_at.lock() = None;
    }

    async fn close_channel_and_shutdown(&self, reason: String) {
        error!(chid = %self.chid, %reason, "closing data-transfer channel");
        self.api
            .close_channel_with_error(self.chid, reason)
            .await;
        self.shutdown();
    }
}
