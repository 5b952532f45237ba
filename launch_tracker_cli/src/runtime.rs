// Single-consumer tracker loop
// Owns the Tracker; feed signals, sweep ticks and stats ticks are handled one
// at a time in a select! loop so token state is never shared.

use chrono::Utc;
use launch_tracker_core::feed::{FeedEvent, FeedSignal, SubscriptionRequest};
use launch_tracker_core::{CompletionSink, CreateOutcome, Settings, TokenRecord, TradeOutcome, Tracker};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub sweep_interval: Duration,
    pub stats_interval: Duration,
}

impl LoopTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
            stats_interval: Duration::from_secs(settings.stats_interval_secs),
        }
    }
}

struct TrackerLoop {
    tracker: Tracker,
    control_tx: mpsc::UnboundedSender<SubscriptionRequest>,
    sink: Arc<dyn CompletionSink>,
}

impl TrackerLoop {
    fn request(&self, request: SubscriptionRequest) {
        if let Err(e) = self.control_tx.send(request) {
            debug!("Feed client gone, dropping {:?}", e.0);
        }
    }

    async fn handle_signal(&mut self, signal: FeedSignal) {
        match signal {
            FeedSignal::Event(FeedEvent::Created(created)) => {
                let id = created.mint.clone();
                if self.tracker.on_create(created) == CreateOutcome::Tracking {
                    self.request(SubscriptionRequest::Subscribe(id));
                }
            }
            FeedSignal::Event(FeedEvent::Trade(trade)) => {
                if let TradeOutcome::Completed(record) = self.tracker.on_trade(trade) {
                    self.finish(*record).await;
                }
            }
            FeedSignal::Disconnected { at } => {
                warn!("Feed disconnected at {}", at);
                self.tracker.on_feed_gap();
            }
            FeedSignal::Reconnected { at, outage } => {
                info!(
                    "Feed reconnected at {} after {}s; {} tokens resubscribed",
                    at,
                    outage.num_seconds(),
                    self.tracker.active_count()
                );
            }
        }
    }

    async fn sweep(&mut self) {
        for record in self.tracker.sweep(Utc::now()) {
            self.finish(record).await;
        }
    }

    async fn finish(&mut self, record: TokenRecord) {
        if let Err(e) = self.sink.on_token_completed(&record).await {
            error!("Failed to persist completed token {}: {}", record.mint, e);
            self.tracker.stats().record_sink_failure();
        }
        self.request(SubscriptionRequest::Unsubscribe(record.mint));
    }
}

/// Process feed signals until `shutdown` resolves or the feed channel
/// closes. Returns the tracker; tokens still active are not finalized.
pub async fn run_tracker<F>(
    tracker: Tracker,
    mut feed_rx: mpsc::Receiver<FeedSignal>,
    control_tx: mpsc::UnboundedSender<SubscriptionRequest>,
    sink: Arc<dyn CompletionSink>,
    timing: LoopTiming,
    shutdown: F,
) -> Tracker
where
    F: Future<Output = ()>,
{
    let mut state = TrackerLoop {
        tracker,
        control_tx,
        sink,
    };

    let mut sweep = interval_at(Instant::now() + timing.sweep_interval, timing.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = interval_at(Instant::now() + timing.stats_interval, timing.stats_interval);
    stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = feed_rx.recv() => match signal {
                Some(signal) => state.handle_signal(signal).await,
                None => {
                    info!("Feed channel closed");
                    break;
                }
            },
            _ = sweep.tick() => state.sweep().await,
            _ = stats.tick() => {
                let tracker = &state.tracker;
                tracker.stats().log_stats(tracker.active_count());
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    let active = state.tracker.active_count();
    if active > 0 {
        warn!("Stopping with {} active tokens left unfinalized", active);
    }
    state.tracker
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use launch_tracker_core::{CompletionReason, CoreError, MemorySink, TokenCreated, TradeEvent, TradeKind};
    use tokio::sync::oneshot;

    fn test_settings() -> Settings {
        Settings {
            sol_usd_rate: 100.0,
            sweep_interval_secs: 1,
            ..Settings::default()
        }
    }

    fn timing() -> LoopTiming {
        LoopTiming {
            sweep_interval: Duration::from_millis(50),
            stats_interval: Duration::from_secs(3600),
        }
    }

    fn created(mint: &str, age_secs: i64) -> FeedSignal {
        FeedSignal::Event(FeedEvent::Created(TokenCreated {
            mint: mint.to_string(),
            symbol: "TST".to_string(),
            name: None,
            initial_market_cap_sol: 50.0,
            creator: None,
            timestamp: Utc::now() - ChronoDuration::seconds(age_secs),
        }))
    }

    fn buy(mint: &str, usd: f64) -> FeedSignal {
        FeedSignal::Event(FeedEvent::Trade(TradeEvent {
            mint: mint.to_string(),
            kind: TradeKind::Buy,
            market_cap_sol: usd / 100.0,
            trader: Some("w1".to_string()),
            timestamp: Utc::now(),
        }))
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<SubscriptionRequest>) -> SubscriptionRequest {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for subscription request")
            .expect("control channel closed")
    }

    struct FailingSink;

    #[async_trait]
    impl CompletionSink for FailingSink {
        async fn on_token_completed(&self, _record: &TokenRecord) -> Result<(), CoreError> {
            Err(CoreError::Sink("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_subscribes_then_persists_and_unsubscribes_on_target() {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(MemorySink::new());
        let tracker = Tracker::new(&test_settings()).unwrap();
        let handle = tokio::spawn(run_tracker(
            tracker,
            feed_rx,
            control_tx,
            sink.clone(),
            timing(),
            std::future::pending(),
        ));

        feed_tx.send(created("moon", 0)).await.unwrap();
        assert_eq!(
            next_request(&mut control_rx).await,
            SubscriptionRequest::Subscribe("moon".to_string())
        );

        feed_tx.send(buy("moon", 30_000.0)).await.unwrap();
        assert_eq!(
            next_request(&mut control_rx).await,
            SubscriptionRequest::Unsubscribe("moon".to_string())
        );

        drop(feed_tx);
        let tracker = handle.await.unwrap();
        assert_eq!(tracker.active_count(), 0);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].completion_reason, CompletionReason::TargetReached);
        assert!(records[0].is_runner);
    }

    #[tokio::test]
    async fn test_sweep_completes_inactive_token() {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(MemorySink::new());
        let tracker = Tracker::new(&test_settings()).unwrap();
        let handle = tokio::spawn(run_tracker(
            tracker,
            feed_rx,
            control_tx,
            sink.clone(),
            timing(),
            std::future::pending(),
        ));

        // created 300s ago with no trades since: past the 180s inactivity timeout
        feed_tx.send(created("idle", 300)).await.unwrap();
        assert_eq!(
            next_request(&mut control_rx).await,
            SubscriptionRequest::Subscribe("idle".to_string())
        );
        assert_eq!(
            next_request(&mut control_rx).await,
            SubscriptionRequest::Unsubscribe("idle".to_string())
        );

        drop(feed_tx);
        handle.await.unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].completion_reason, CompletionReason::Inactive);
        assert!(!records[0].is_runner);
    }

    #[tokio::test]
    async fn test_disconnect_marks_feed_gap_and_shutdown_leaves_tokens_active() {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (control_tx, _control_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let tracker = Tracker::new(&test_settings()).unwrap();
        let handle = tokio::spawn(run_tracker(
            tracker,
            feed_rx,
            control_tx,
            Arc::new(MemorySink::new()),
            timing(),
            async {
                let _ = stop_rx.await;
            },
        ));

        feed_tx.send(created("live", 0)).await.unwrap();
        feed_tx
            .send(FeedSignal::Disconnected { at: Utc::now() })
            .await
            .unwrap();
        feed_tx
            .send(FeedSignal::Reconnected {
                at: Utc::now(),
                outage: ChronoDuration::seconds(3),
            })
            .await
            .unwrap();
        feed_tx.send(buy("live", 6_000.0)).await.unwrap();

        // wait until the trade has been applied
        for _ in 0..100 {
            if feed_tx.capacity() == 16 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(()).unwrap();

        let tracker = handle.await.unwrap();
        let state = tracker.get("live").unwrap();
        assert!(state.is_active());
        assert_eq!(state.feed_gaps(), 1);
        assert_eq!(state.total_buys(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_tracking() {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let tracker = Tracker::new(&test_settings()).unwrap();
        let stats = tracker.stats();
        let handle = tokio::spawn(run_tracker(
            tracker,
            feed_rx,
            control_tx,
            Arc::new(FailingSink),
            timing(),
            std::future::pending(),
        ));

        feed_tx.send(created("a", 0)).await.unwrap();
        feed_tx.send(buy("a", 30_000.0)).await.unwrap();
        feed_tx.send(created("b", 0)).await.unwrap();

        assert_eq!(next_request(&mut control_rx).await, SubscriptionRequest::Subscribe("a".to_string()));
        assert_eq!(next_request(&mut control_rx).await, SubscriptionRequest::Unsubscribe("a".to_string()));
        assert_eq!(next_request(&mut control_rx).await, SubscriptionRequest::Subscribe("b".to_string()));

        drop(feed_tx);
        let tracker = handle.await.unwrap();
        assert!(tracker.get("b").is_some());
        assert_eq!(stats.snapshot().sink_failures, 1);
    }
}
