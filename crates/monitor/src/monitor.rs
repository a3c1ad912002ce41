//! The push-channel monitor.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use conduit_primitives::ChannelId;

use crate::api::MonitorApi;
use crate::channel::{ChannelSet, MonitoredChannel};
use crate::config::{MonitorConfig, MonitorConfigError};

/// Watches the data-rate of push channels and restarts any whose rate falls
/// too low.
///
/// Constructed with `None` config the monitor is disabled: adding channels
/// is a no-op and no tick task runs.
pub struct Monitor {
    api: Arc<dyn MonitorApi>,
    cfg: Option<MonitorConfig>,
    channels: ChannelSet,
    shutdown_tx: watch::Sender<bool>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Creates the monitor. A present config is validated; every field must
    /// be strictly positive.
    pub fn new(
        api: Arc<dyn MonitorApi>,
        cfg: Option<MonitorConfig>,
    ) -> Result<Self, MonitorConfigError> {
        if let Some(cfg) = &cfg {
            cfg.validate()?;
        }
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            api,
            cfg,
            channels: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            tick_task: Mutex::new(None),
        })
    }

    /// Whether the monitor is running at all.
    pub fn enabled(&self) -> bool {
        self.cfg.is_some()
    }

    /// Number of channels currently under watch.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Start the global check tick.
    pub fn start(&self) {
        let Some(cfg) = self.cfg else {
            return;
        };
        let tick = cfg.check_tick();
        info!(
            checks_per_interval = cfg.checks_per_interval,
            interval = ?cfg.interval,
            check_tick = ?tick,
            min_bytes_sent = cfg.min_bytes_sent,
            restart_backoff = ?cfg.restart_backoff,
            max_consecutive_restarts = cfg.max_consecutive_restarts,
            "starting push channel monitor"
        );

        let channels = Arc::clone(&self.channels);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let snapshot: Vec<Arc<MonitoredChannel>> =
                            channels.read().values().cloned().collect();
                        for channel in snapshot {
                            channel.check_data_rate();
                        }
                    }
                }
            }
        });
        *self.tick_task.lock() = Some(task);
    }

    /// Put a push channel under watch.
    ///
    /// Returns `None` when the monitor is disabled. The returned handle lets
    /// the caller tear the entry down early (e.g. when the opening request
    /// could not even be sent).
    pub fn add_channel(&self, chid: ChannelId) -> Option<Arc<MonitoredChannel>> {
        let cfg = self.cfg?;
        // Restarts re-add channels that are already being watched.
        if let Some(existing) = self.channels.read().get(&chid) {
            return Some(Arc::clone(existing));
        }
        let mc = MonitoredChannel::new(Arc::clone(&self.api), chid, cfg, &self.channels);
        self.channels.write().insert(chid, Arc::clone(&mc));
        Some(mc)
    }

    /// Stop the tick task and shut down every monitored channel.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.tick_task.lock().take() {
            task.abort();
        }
        let snapshot: Vec<Arc<MonitoredChannel>> =
            self.channels.read().values().cloned().collect();
        for channel in snapshot {
            channel.shutdown();
        }
    }

    /// Whether the tick task has been started.
    pub fn is_running(&self) -> bool {
        self.tick_task.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use libp2p_identity::PeerId;

    use conduit_api::{Subscriber, Unsubscribe};
    use conduit_primitives::{
        ChannelEvent, ChannelId, ChannelRecord, ContentId, Selector, Status, TransferId,
        TypedPayload,
    };

    use crate::api::MonitorApiError;

    #[derive(Default)]
    struct FakeApi {
        subscribers: Mutex<Vec<Subscriber>>,
        restarts: AtomicU32,
        fail_restarts: bool,
        closed: Mutex<Option<String>>,
    }

    impl FakeApi {
        fn failing() -> Self {
            Self {
                fail_restarts: true,
                ..Self::default()
            }
        }

        fn publish(&self, event: &ChannelEvent, state: &ChannelRecord) {
            let snapshot: Vec<Subscriber> = self.subscribers.lock().clone();
            for subscriber in snapshot {
                subscriber(event, state);
            }
        }

        fn restart_count(&self) -> u32 {
            self.restarts.load(Ordering::SeqCst)
        }

        fn close_reason(&self) -> Option<String> {
            self.closed.lock().clone()
        }
    }

    #[async_trait]
    impl MonitorApi for FakeApi {
        fn subscribe(&self, subscriber: Subscriber) -> Unsubscribe {
            self.subscribers.lock().push(subscriber);
            Box::new(|| {})
        }

        async fn restart_channel(&self, _chid: ChannelId) -> Result<(), MonitorApiError> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            if self.fail_restarts {
                return Err(MonitorApiError("no route to peer".into()));
            }
            Ok(())
        }

        async fn close_channel_with_error(&self, _chid: ChannelId, reason: String) {
            *self.closed.lock() = Some(reason);
        }
    }

    fn test_cfg() -> MonitorConfig {
        MonitorConfig {
            accept_timeout: Duration::from_secs(5),
            interval: Duration::from_secs(2),
            checks_per_interval: 2,
            min_bytes_sent: 1024,
            restart_backoff: Duration::from_millis(100),
            max_consecutive_restarts: 3,
            complete_timeout: Duration::from_secs(5),
        }
    }

    fn snapshot(chid: ChannelId, status: Status, queued: u64, sent: u64) -> ChannelRecord {
        let mut record = ChannelRecord::new(
            chid,
            chid.initiator,
            chid.responder,
            false,
            ContentId::new([1u8; 32]),
            Selector::all(),
            TypedPayload::new("test/voucher", vec![1]),
        );
        record.status = status;
        record.queued = queued;
        record.sent = sent;
        record
    }

    fn test_chid() -> ChannelId {
        ChannelId::new(PeerId::random(), PeerId::random(), TransferId(1))
    }

    async fn settle() {
        // Let spawned watchdog tasks run under the paused clock.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn accept_timeout_closes_channel() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        let reason = api.close_reason().expect("channel should have been closed");
        assert!(reason.contains("Accept"), "unexpected reason: {reason}");
        assert_eq!(monitor.channel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_cancels_timer() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert!(api.close_reason().is_none());
        assert_eq!(monitor.channel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn low_data_rate_triggers_restart() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        monitor.start();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));
        // Plenty queued, nothing sent.
        api.publish(
            &ChannelEvent::DataQueued { bytes: 1 << 20 },
            &snapshot(chid, Status::Ongoing, 1 << 20, 0),
        );

        // One full interval fills the window; the next check pops and trips.
        tokio::time::sleep(test_cfg().interval * 2).await;
        settle().await;

        assert!(api.restart_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_data_rate_does_not_restart() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        monitor.start();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));

        // Keep sending comfortably above min_bytes_sent per interval.
        for step in 1..=8u64 {
            let sent = step * 4096;
            api.publish(
                &ChannelEvent::DataQueued { bytes: 4096 },
                &snapshot(chid, Status::Ongoing, sent + 4096, sent.saturating_sub(4096)),
            );
            api.publish(
                &ChannelEvent::DataSent { bytes: 4096 },
                &snapshot(chid, Status::Ongoing, sent + 4096, sent),
            );
            tokio::time::sleep(test_cfg().check_tick()).await;
        }
        settle().await;

        assert_eq!(api.restart_count(), 0);
        assert!(api.close_reason().is_none());
    }

    /// Run one manual data-rate check and let the spawned restart task
    /// finish, including its backoff.
    async fn check_and_settle(mc: &Arc<MonitoredChannel>, cfg: &MonitorConfig) {
        mc.check_data_rate();
        settle().await;
        tokio::time::sleep(cfg.restart_backoff * 2).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_restarts_close_the_channel() {
        let api = Arc::new(FakeApi::default());
        let mut cfg = test_cfg();
        cfg.max_consecutive_restarts = 2;
        let monitor = Monitor::new(api.clone(), Some(cfg)).unwrap();
        let chid = test_chid();
        let mc = monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));
        api.publish(
            &ChannelEvent::DataQueued { bytes: 1 << 20 },
            &snapshot(chid, Status::Ongoing, 1 << 20, 0),
        );

        // Fill the window.
        mc.check_data_rate();
        mc.check_data_rate();

        // Stalled forever: every further check trips a restart until the
        // budget runs out.
        check_and_settle(&mc, &cfg).await;
        check_and_settle(&mc, &cfg).await;
        assert_eq!(api.restart_count(), 2);
        assert!(api.close_reason().is_none());

        check_and_settle(&mc, &cfg).await;
        assert_eq!(api.restart_count(), 2);
        let reason = api.close_reason().expect("channel should have been closed");
        assert!(reason.contains("consecutive restarts"), "{reason}");
        assert_eq!(monitor.channel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn data_sent_resets_restart_budget() {
        let api = Arc::new(FakeApi::default());
        let mut cfg = test_cfg();
        cfg.max_consecutive_restarts = 1;
        let monitor = Monitor::new(api.clone(), Some(cfg)).unwrap();
        let chid = test_chid();
        let mc = monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));
        api.publish(
            &ChannelEvent::DataQueued { bytes: 1 << 20 },
            &snapshot(chid, Status::Ongoing, 1 << 20, 0),
        );

        // Fill the window, then stall: one restart spends the whole budget.
        mc.check_data_rate();
        mc.check_data_rate();
        check_and_settle(&mc, &cfg).await;
        assert_eq!(api.restart_count(), 1);
        assert!(api.close_reason().is_none());

        // The restart worked: data moves again, refilling the budget.
        api.publish(
            &ChannelEvent::DataSent { bytes: 1 << 20 },
            &snapshot(chid, Status::Ongoing, 1 << 20, 1 << 20),
        );
        api.publish(
            &ChannelEvent::DataQueued { bytes: 1 << 20 },
            &snapshot(chid, Status::Ongoing, 2 << 20, 1 << 20),
        );

        // Second stall: drain the healthy samples, then trip again. The
        // channel restarts instead of closing.
        check_and_settle(&mc, &cfg).await;
        check_and_settle(&mc, &cfg).await;
        check_and_settle(&mc, &cfg).await;
        assert_eq!(api.restart_count(), 2);
        assert!(api.close_reason().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_restart_closes_channel() {
        let api = Arc::new(FakeApi::failing());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        monitor.start();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));
        api.publish(
            &ChannelEvent::DataQueued { bytes: 1 << 20 },
            &snapshot(chid, Status::Ongoing, 1 << 20, 0),
        );

        tokio::time::sleep(test_cfg().interval * 2).await;
        settle().await;

        let reason = api.close_reason().expect("channel should have been closed");
        assert!(reason.contains("restart message"), "{reason}");
    }

    #[tokio::test(start_paused = true)]
    async fn complete_timeout_closes_channel() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();

        api.publish(&ChannelEvent::Accept, &snapshot(chid, Status::Ongoing, 0, 0));
        api.publish(
            &ChannelEvent::FinishTransfer,
            &snapshot(chid, Status::TransferFinished, 0, 0),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        let reason = api.close_reason().expect("channel should have been closed");
        assert!(reason.contains("Complete"), "{reason}");
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_shuts_entry_down() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), Some(test_cfg())).unwrap();
        let chid = test_chid();
        monitor.add_channel(chid).unwrap();
        assert_eq!(monitor.channel_count(), 1);

        api.publish(
            &ChannelEvent::Complete,
            &snapshot(chid, Status::Completed, 0, 0),
        );
        assert_eq!(monitor.channel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_monitor_ignores_channels() {
        let api = Arc::new(FakeApi::default());
        let monitor = Monitor::new(api.clone(), None).unwrap();
        assert!(!monitor.enabled());
        assert!(monitor.add_channel(test_chid()).is_none());
        monitor.start();
        assert!(!monitor.is_running());
    }
}
