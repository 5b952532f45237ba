// Tracker operational counters
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::CompletionReason;

/// Counters for everything the tracker did with the feed.
#[derive(Debug, Default)]
pub struct TrackerStats {
    /// Creation events accepted into the registry
    pub tokens_tracked: AtomicU64,
    /// Creations dropped because the id was already active
    pub duplicate_creates: AtomicU64,
    /// Creations dropped because the id already completed
    pub recreate_rejected: AtomicU64,
    /// Creations dropped because `max_active_tokens` was reached
    pub capacity_rejected: AtomicU64,
    /// Trades applied to an active token
    pub trades_applied: AtomicU64,
    /// Trades for ids never created (or evicted from memory)
    pub trades_unknown: AtomicU64,
    /// Trades for ids already completed
    pub trades_after_completion: AtomicU64,
    pub snapshots_frozen: AtomicU64,
    pub acceleration_alerts: AtomicU64,
    pub completed_target_reached: AtomicU64,
    pub completed_max_age: AtomicU64,
    pub completed_inactive: AtomicU64,
    pub runners: AtomicU64,
    pub flops: AtomicU64,
    /// Feed messages that failed to parse
    pub parse_failures: AtomicU64,
    pub feed_gaps: AtomicU64,
    pub sink_failures: AtomicU64,
}

impl TrackerStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tracked(&self) {
        Self::bump(&self.tokens_tracked);
    }

    pub fn record_duplicate_create(&self) {
        Self::bump(&self.duplicate_creates);
    }

    pub fn record_recreate_rejected(&self) {
        Self::bump(&self.recreate_rejected);
    }

    pub fn record_capacity_rejected(&self) {
        Self::bump(&self.capacity_rejected);
    }

    pub fn record_trade_applied(&self) {
        Self::bump(&self.trades_applied);
    }

    pub fn record_trade_unknown(&self) {
        Self::bump(&self.trades_unknown);
    }

    pub fn record_trade_after_completion(&self) {
        Self::bump(&self.trades_after_completion);
    }

    pub fn record_snapshots(&self, n: usize) {
        self.snapshots_frozen.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_acceleration(&self) {
        Self::bump(&self.acceleration_alerts);
    }

    pub fn record_completion(&self, reason: CompletionReason, is_runner: bool) {
        match reason {
            CompletionReason::TargetReached => Self::bump(&self.completed_target_reached),
            CompletionReason::MaxAge => Self::bump(&self.completed_max_age),
            CompletionReason::Inactive => Self::bump(&self.completed_inactive),
        }
        if is_runner {
            Self::bump(&self.runners);
        } else {
            Self::bump(&self.flops);
        }
    }

    pub fn record_parse_failure(&self) {
        Self::bump(&self.parse_failures);
    }

    pub fn record_feed_gap(&self) {
        Self::bump(&self.feed_gaps);
    }

    pub fn record_sink_failure(&self) {
        Self::bump(&self.sink_failures);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tokens_tracked: load(&self.tokens_tracked),
            duplicate_creates: load(&self.duplicate_creates),
            recreate_rejected: load(&self.recreate_rejected),
            capacity_rejected: load(&self.capacity_rejected),
            trades_applied: load(&self.trades_applied),
            trades_unknown: load(&self.trades_unknown),
            trades_after_completion: load(&self.trades_after_completion),
            snapshots_frozen: load(&self.snapshots_frozen),
            acceleration_alerts: load(&self.acceleration_alerts),
            completed_target_reached: load(&self.completed_target_reached),
            completed_max_age: load(&self.completed_max_age),
            completed_inactive: load(&self.completed_inactive),
            runners: load(&self.runners),
            flops: load(&self.flops),
            parse_failures: load(&self.parse_failures),
            feed_gaps: load(&self.feed_gaps),
            sink_failures: load(&self.sink_failures),
        }
    }

    pub fn log_stats(&self, active: usize) {
        let s = self.snapshot();
        info!(
            "Tracker: {} active | {} tracked | {} completed ({} runners, {} flops; {} target, {} max_age, {} inactive) | {} trades ({} unknown, {} late) | {} snapshots | {} alerts | {} rejected | {} parse failures | {} feed gaps",
            active,
            s.tokens_tracked,
            s.completed(),
            s.runners,
            s.flops,
            s.completed_target_reached,
            s.completed_max_age,
            s.completed_inactive,
            s.trades_applied,
            s.trades_unknown,
            s.trades_after_completion,
            s.snapshots_frozen,
            s.acceleration_alerts,
            s.duplicate_creates + s.recreate_rejected + s.capacity_rejected,
            s.parse_failures,
            s.feed_gaps,
        );
    }
}

/// Immutable copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tokens_tracked: u64,
    pub duplicate_creates: u64,
    pub recreate_rejected: u64,
    pub capacity_rejected: u64,
    pub trades_applied: u64,
    pub trades_unknown: u64,
    pub trades_after_completion: u64,
    pub snapshots_frozen: u64,
    pub acceleration_alerts: u64,
    pub completed_target_reached: u64,
    pub completed_max_age: u64,
    pub completed_inactive: u64,
    pub runners: u64,
    pub flops: u64,
    pub parse_failures: u64,
    pub feed_gaps: u64,
    pub sink_failures: u64,
}

impl StatsSnapshot {
    pub fn completed(&self) -> u64 {
        self.completed_target_reached + self.completed_max_age + self.completed_inactive
    }

    pub fn runner_rate_percent(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            return 0.0;
        }
        (self.runners as f64 / completed as f64) * 100.0
    }
}
