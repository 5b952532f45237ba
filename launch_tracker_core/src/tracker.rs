// Owned registry of tracked tokens
//
// The tracker is driven by a single consumer: feed events, sweep ticks and
// feed-gap notices are applied one at a time, so no per-token locking exists.

use crate::error::CoreError;
use crate::lifecycle::{evaluate_on_sweep, evaluate_on_trade, LifecycleAction, LifecyclePolicy};
use crate::models::{
    AccelerationMark, CompletionReason, TokenCreated, TokenRecord, TradeEvent, TradeKind,
};
use crate::scheduler::SnapshotScheduler;
use crate::settings::Settings;
use crate::state::{duration_secs, TokenState};
use crate::stats::TrackerStats;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// New token accepted; its trade stream should be subscribed.
    Tracking,
    Duplicate,
    AlreadyCompleted,
    AtCapacity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    Applied {
        frozen: Vec<String>,
        /// Set on the trade that first flagged the token as accelerating.
        first_acceleration: Option<AccelerationMark>,
    },
    Completed(Box<TokenRecord>),
    /// No active token with this id.
    Unknown,
    /// The id already completed; the trade was dropped.
    AfterCompletion,
    /// Creation events only enter through [`Tracker::on_create`].
    Ignored,
}

pub struct Tracker {
    tokens: HashMap<String, TokenState>,
    completed: LruCache<String, CompletionReason>,
    scheduler: SnapshotScheduler,
    lifecycle: LifecyclePolicy,
    sol_usd_rate: f64,
    trade_log_capacity: usize,
    price_window: Duration,
    max_active_tokens: usize,
    stats: Arc<TrackerStats>,
}

impl Tracker {
    pub fn new(settings: &Settings) -> Result<Self, CoreError> {
        Self::with_stats(settings, Arc::new(TrackerStats::new()))
    }

    /// Build a tracker that reports into an existing set of counters.
    pub fn with_stats(settings: &Settings, stats: Arc<TrackerStats>) -> Result<Self, CoreError> {
        let capacity = NonZeroUsize::new(settings.completed_cache_capacity).ok_or_else(|| {
            CoreError::Validation("completed_cache_capacity must be > 0".to_string())
        })?;
        let scheduler = SnapshotScheduler::new(
            settings.parsed_checkpoints()?,
            settings.snapshot_window(),
            settings.velocity_policy(),
        );
        Ok(Self {
            tokens: HashMap::new(),
            completed: LruCache::new(capacity),
            scheduler,
            lifecycle: settings.lifecycle_policy(),
            sol_usd_rate: settings.sol_usd_rate,
            trade_log_capacity: settings.trade_log_capacity,
            price_window: settings.velocity_window(),
            max_active_tokens: settings.max_active_tokens,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<TrackerStats> {
        self.stats.clone()
    }

    pub fn get(&self, id: &str) -> Option<&TokenState> {
        self.tokens.get(id)
    }

    pub fn active_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.tokens.keys().cloned().collect()
    }

    /// Completion reason for an id still held in the completed-id memory.
    pub fn completed_reason(&self, id: &str) -> Option<CompletionReason> {
        self.completed.peek(id).copied()
    }

    pub fn on_create(&mut self, created: TokenCreated) -> CreateOutcome {
        if self.completed.contains(&created.mint) {
            debug!("Ignoring re-creation of completed token {}", created.mint);
            self.stats.record_recreate_rejected();
            return CreateOutcome::AlreadyCompleted;
        }
        if self.tokens.contains_key(&created.mint) {
            debug!("Duplicate create for {}", created.mint);
            self.stats.record_duplicate_create();
            return CreateOutcome::Duplicate;
        }
        if self.tokens.len() >= self.max_active_tokens {
            debug!(
                "At capacity ({} active), not tracking {} ({})",
                self.tokens.len(),
                created.symbol,
                created.mint
            );
            self.stats.record_capacity_rejected();
            return CreateOutcome::AtCapacity;
        }

        let state = TokenState::new(
            &created,
            self.trade_log_capacity,
            self.price_window,
            self.sol_usd_rate,
        );
        info!(
            "Tracking {} ({}) at ${:.0}",
            created.symbol,
            created.mint,
            state.latest_market_cap_usd()
        );
        self.tokens.insert(created.mint, state);
        self.stats.record_tracked();
        CreateOutcome::Tracking
    }

    /// Add a trade to the token's windows without running the scheduler or
    /// lifecycle checks. Returns `false` for unknown or completed ids.
    pub fn append(&mut self, id: &str, event: TradeEvent) -> bool {
        match self.tokens.get_mut(id) {
            Some(state) => state.record_trade(event, self.sol_usd_rate),
            None => false,
        }
    }

    /// Trades for `id` with `now - timestamp <= window`. Empty for unknown ids.
    pub fn trades_within(&self, id: &str, window: Duration, now: DateTime<Utc>) -> Vec<&TradeEvent> {
        self.tokens
            .get(id)
            .map(|state| state.window().trades_within(window, now))
            .unwrap_or_default()
    }

    /// Apply one trade: append, freeze due checkpoints, raise the first
    /// acceleration alert, then run the trade-time completion checks.
    pub fn on_trade(&mut self, event: TradeEvent) -> TradeOutcome {
        if event.kind == TradeKind::Create {
            return TradeOutcome::Ignored;
        }
        if self.completed.contains(&event.mint) {
            self.stats.record_trade_after_completion();
            return TradeOutcome::AfterCompletion;
        }
        let now = event.timestamp;
        let id = event.mint.clone();
        let Some(state) = self.tokens.get_mut(&id) else {
            self.stats.record_trade_unknown();
            return TradeOutcome::Unknown;
        };

        if !state.record_trade(event, self.sol_usd_rate) {
            self.stats.record_trade_after_completion();
            return TradeOutcome::AfterCompletion;
        }
        self.stats.record_trade_applied();

        let frozen = self.scheduler.freeze_due(state, now);
        self.stats.record_snapshots(frozen.len());

        let mut first_acceleration = None;
        if let Some(signal) = self.scheduler.signal(state).filter(|s| s.is_accelerating) {
            let mark = AccelerationMark {
                age_secs: duration_secs(state.age(now)),
                market_cap_usd: state.latest_market_cap_usd(),
                velocity: signal.velocity,
                accel_rate: signal.accel_rate,
            };
            if state.mark_acceleration(mark) {
                info!(
                    "Acceleration: {} ({}) at {:.0}s: ${:.0} mc, {:+.1}% over {}s, {:.0} $/s",
                    state.symbol(),
                    state.mint(),
                    mark.age_secs,
                    mark.market_cap_usd,
                    signal.gain_pct,
                    self.scheduler.velocity_policy().baseline.num_seconds(),
                    signal.velocity
                );
                self.stats.record_acceleration();
                first_acceleration = Some(mark);
            }
        }

        let action = evaluate_on_trade(state, now, &self.lifecycle);
        match action {
            LifecycleAction::Complete(reason) => match self.finalize(&id, reason, now) {
                Some(record) => TradeOutcome::Completed(Box::new(record)),
                None => TradeOutcome::AfterCompletion,
            },
            LifecycleAction::Continue => TradeOutcome::Applied {
                frozen,
                first_acceleration,
            },
        }
    }

    /// Periodic check of every active token for max age and inactivity.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<TokenRecord> {
        let mut due: Vec<(String, CompletionReason)> = self
            .tokens
            .iter()
            .filter_map(|(id, state)| match evaluate_on_sweep(state, now, &self.lifecycle) {
                LifecycleAction::Complete(reason) => Some((id.clone(), reason)),
                LifecycleAction::Continue => None,
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));

        due.into_iter()
            .filter_map(|(id, reason)| self.finalize(&id, reason, now))
            .collect()
    }

    /// The feed connection dropped; every active token may have missed trades.
    pub fn on_feed_gap(&mut self) {
        self.stats.record_feed_gap();
        for state in self.tokens.values_mut() {
            state.note_feed_gap();
        }
        if !self.tokens.is_empty() {
            warn!("Feed gap recorded on {} active tokens", self.tokens.len());
        }
    }

    fn finalize(
        &mut self,
        id: &str,
        reason: CompletionReason,
        now: DateTime<Utc>,
    ) -> Option<TokenRecord> {
        let mut state = self.tokens.remove(id)?;
        let record = state.complete(reason, now, &self.lifecycle)?;
        self.completed.put(record.mint.clone(), reason);
        self.stats.record_completion(reason, record.is_runner);
        info!(
            "{} {} ({}) completed: {} at ${:.0} (peak ${:.0}) after {:.0}s, {} snapshots",
            if record.is_runner { "Runner" } else { "Flop" },
            record.symbol,
            record.mint,
            reason,
            record.final_market_cap_usd,
            record.peak_market_cap_usd,
            record.observed_secs,
            record.snapshots.len()
        );
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn test_settings() -> Settings {
        Settings {
            sol_usd_rate: 100.0,
            ..Settings::default()
        }
    }

    fn created(mint: &str, usd: f64) -> TokenCreated {
        TokenCreated {
            mint: mint.to_string(),
            symbol: mint.to_uppercase(),
            name: None,
            initial_market_cap_sol: usd / 100.0,
            creator: Some("dev".to_string()),
            timestamp: t0(),
        }
    }

    fn trade(mint: &str, secs: i64, usd: f64, kind: TradeKind) -> TradeEvent {
        TradeEvent {
            mint: mint.to_string(),
            kind,
            market_cap_sol: usd / 100.0,
            trader: None,
            timestamp: at(secs),
        }
    }

    #[test]
    fn test_fifteen_second_snapshot_scenario() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        assert_eq!(tracker.on_create(created("abc", 5_000.0)), CreateOutcome::Tracking);

        tracker.on_trade(trade("abc", 3, 8_000.0, TradeKind::Buy));
        tracker.on_trade(trade("abc", 9, 9_500.0, TradeKind::Buy));
        let at_12 = tracker.on_trade(trade("abc", 12, 14_000.0, TradeKind::Buy));
        assert!(matches!(at_12, TradeOutcome::Applied { ref frozen, .. } if frozen == &vec!["10s".to_string()]));
        let at_16 = tracker.on_trade(trade("abc", 16, 15_200.0, TradeKind::Sell));
        assert!(matches!(at_16, TradeOutcome::Applied { ref frozen, .. } if frozen == &vec!["15s".to_string()]));

        let state = tracker.get("abc").unwrap();
        let snap = state.snapshots().get("15s").unwrap();
        assert_eq!(snap.txn, 4);
        assert_eq!(snap.buys, 3);
        assert_eq!(snap.sells, 1);
        assert_eq!(snap.buy_ratio, 0.75);
        assert_eq!(snap.age_secs, 16.0);
        assert_eq!(snap.market_cap_usd, 15_200.0);
        assert!(snap.traders.is_approximate());
        assert!(!state.snapshots().contains("20s"));
    }

    #[test]
    fn test_sweep_completes_inactive_token() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("idle", 5_000.0));
        tracker.on_trade(trade("idle", 30, 6_000.0, TradeKind::Buy));

        assert!(tracker.sweep(at(200)).is_empty());
        let records = tracker.sweep(at(211));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].completion_reason, CompletionReason::Inactive);
        assert!(!records[0].is_runner);
        assert!(tracker.get("idle").is_none());
        assert_eq!(tracker.completed_reason("idle"), Some(CompletionReason::Inactive));
    }

    #[test]
    fn test_unknown_token_trade_changes_nothing() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("abc", 5_000.0));
        let before = tracker.stats().snapshot();

        assert_eq!(tracker.on_trade(trade("X", 5, 9_000.0, TradeKind::Buy)), TradeOutcome::Unknown);
        assert!(!tracker.append("X", trade("X", 6, 9_000.0, TradeKind::Buy)));
        assert!(tracker.trades_within("X", Duration::seconds(60), at(6)).is_empty());
        assert_eq!(tracker.active_ids(), vec!["abc".to_string()]);
        assert!(tracker.get("X").is_none());

        let after = tracker.stats().snapshot();
        assert_eq!(after.trades_unknown, before.trades_unknown + 1);
        assert_eq!(after.trades_applied, before.trades_applied);
    }

    #[test]
    fn test_target_reached_then_trades_are_noops() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("moon", 5_000.0));
        tracker.on_trade(trade("moon", 11, 12_000.0, TradeKind::Buy));

        let outcome = tracker.on_trade(trade("moon", 14, 26_000.0, TradeKind::Buy));
        let record = match outcome {
            TradeOutcome::Completed(record) => record,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(record.completion_reason, CompletionReason::TargetReached);
        assert_eq!(record.final_market_cap_usd, 26_000.0);
        assert!(record.is_runner);
        assert_eq!(record.snapshots.labels(), vec!["10s"]);

        assert_eq!(
            tracker.on_trade(trade("moon", 20, 1_000.0, TradeKind::Sell)),
            TradeOutcome::AfterCompletion
        );
        assert!(tracker.get("moon").is_none());
        assert!(tracker.sweep(at(10_000)).is_empty());
        assert_eq!(tracker.stats().snapshot().completed(), 1);
    }

    #[test]
    fn test_completed_id_cannot_be_recreated() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("abc", 5_000.0));
        tracker.sweep(at(600));
        assert_eq!(tracker.completed_reason("abc"), Some(CompletionReason::MaxAge));
        assert_eq!(tracker.on_create(created("abc", 5_000.0)), CreateOutcome::AlreadyCompleted);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_duplicate_and_capacity_rejections() {
        let settings = Settings {
            max_active_tokens: 2,
            ..test_settings()
        };
        let mut tracker = Tracker::new(&settings).unwrap();
        assert_eq!(tracker.on_create(created("a", 5_000.0)), CreateOutcome::Tracking);
        assert_eq!(tracker.on_create(created("a", 5_000.0)), CreateOutcome::Duplicate);
        assert_eq!(tracker.on_create(created("b", 5_000.0)), CreateOutcome::Tracking);
        assert_eq!(tracker.on_create(created("c", 5_000.0)), CreateOutcome::AtCapacity);

        let snap = tracker.stats().snapshot();
        assert_eq!(snap.tokens_tracked, 2);
        assert_eq!(snap.duplicate_creates, 1);
        assert_eq!(snap.capacity_rejected, 1);
    }

    #[test]
    fn test_frozen_snapshots_survive_later_trades() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("abc", 5_000.0));
        tracker.on_trade(trade("abc", 10, 6_000.0, TradeKind::Buy));
        let frozen = tracker.get("abc").unwrap().snapshots().get("10s").cloned().unwrap();

        for s in 11..120 {
            let kind = if s % 3 == 0 { TradeKind::Sell } else { TradeKind::Buy };
            tracker.on_trade(trade("abc", s, 6_000.0 + (s % 7) as f64 * 500.0, kind));
            let state = tracker.get("abc").unwrap();
            assert_eq!(state.snapshots().get("10s"), Some(&frozen));
            assert!(state.snapshots().iter().all(|(_, snap)| (0.0..=1.0).contains(&snap.buy_ratio)));
        }
        assert_eq!(
            tracker.get("abc").unwrap().snapshots().labels(),
            vec!["10s", "15s", "20s", "30s", "1min"]
        );
    }

    #[test]
    fn test_first_acceleration_is_recorded_once() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("pump", 5_000.0));
        tracker.on_trade(trade("pump", 10, 6_000.0, TradeKind::Buy));

        let outcome = tracker.on_trade(trade("pump", 20, 9_000.0, TradeKind::Buy));
        let mark = match outcome {
            TradeOutcome::Applied {
                first_acceleration: Some(mark),
                ..
            } => mark,
            other => panic!("expected acceleration alert, got {:?}", other),
        };
        assert_eq!(mark.age_secs, 20.0);
        assert_eq!(mark.market_cap_usd, 9_000.0);

        let again = tracker.on_trade(trade("pump", 30, 13_000.0, TradeKind::Buy));
        assert!(matches!(
            again,
            TradeOutcome::Applied {
                first_acceleration: None,
                ..
            }
        ));
        assert_eq!(tracker.get("pump").unwrap().first_acceleration(), Some(&mark));
        assert_eq!(tracker.stats().snapshot().acceleration_alerts, 1);
    }

    #[test]
    fn test_feed_gap_marks_active_tokens_only() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("a", 5_000.0));
        tracker.on_create(created("b", 5_000.0));
        tracker.on_feed_gap();
        tracker.on_feed_gap();
        assert_eq!(tracker.get("a").unwrap().feed_gaps(), 2);

        let records = tracker.sweep(at(600));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.feed_gaps == 2));
        assert_eq!(records[0].mint, "a");
    }

    #[test]
    fn test_oversized_durations_neither_panic_nor_wrap() {
        let settings = Settings {
            checkpoints: vec!["10s".to_string(), "10000000000000000s".to_string()],
            ..test_settings()
        };
        assert!(matches!(Tracker::new(&settings), Err(CoreError::Checkpoint(_))));

        let settings = Settings {
            max_age_secs: u64::MAX,
            ..test_settings()
        };
        let mut tracker = Tracker::new(&settings).unwrap();
        tracker.on_create(created("old", 5_000.0));
        assert!(tracker.sweep(t0()).is_empty());
        assert!(matches!(
            tracker.on_trade(trade("old", 11, 6_000.0, TradeKind::Buy)),
            TradeOutcome::Applied { .. }
        ));
        assert!(tracker.get("old").unwrap().is_active());
    }

    #[test]
    fn test_append_only_touches_windows() {
        let mut tracker = Tracker::new(&test_settings()).unwrap();
        tracker.on_create(created("abc", 5_000.0));
        assert!(tracker.append("abc", trade("abc", 20, 30_000.0, TradeKind::Buy)));
        let state = tracker.get("abc").unwrap();
        assert!(state.is_active());
        assert!(state.snapshots().is_empty());
        assert_eq!(tracker.trades_within("abc", Duration::seconds(5), at(20)).len(), 1);
        assert_eq!(tracker.trades_within("abc", Duration::seconds(20), at(20)).len(), 2);
    }
}
