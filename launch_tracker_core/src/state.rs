// Per-token lifecycle state

use crate::models::{
    AccelerationMark, CompletionReason, LifecycleState, PricePoint, Snapshot, SnapshotSet,
    TokenCreated, TokenRecord, TradeEvent, TradeKind,
};
use crate::lifecycle::{is_runner, LifecyclePolicy};
use crate::window::TradeWindow;
use chrono::{DateTime, Duration, Utc};

pub(crate) fn duration_secs(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub reason: CompletionReason,
    pub final_market_cap_usd: f64,
    pub completed_at: DateTime<Utc>,
    pub is_runner: bool,
}

/// Everything the tracker knows about one token.
///
/// Mutated only through [`TokenState::record_trade`], [`TokenState::freeze_snapshot`]
/// and [`TokenState::complete`]; all three are no-ops once the token is completed.
#[derive(Debug, Clone)]
pub struct TokenState {
    mint: String,
    symbol: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    last_trade_at: DateTime<Utc>,
    window: TradeWindow,
    snapshots: SnapshotSet,
    lifecycle: LifecycleState,
    completion: Option<Completion>,
    latest_market_cap_usd: f64,
    peak_market_cap_usd: f64,
    total_buys: u64,
    total_sells: u64,
    feed_gaps: u32,
    first_acceleration: Option<AccelerationMark>,
}

impl TokenState {
    pub fn new(
        created: &TokenCreated,
        log_capacity: usize,
        price_window: Duration,
        sol_usd_rate: f64,
    ) -> Self {
        let mut window = TradeWindow::new(log_capacity, price_window);
        let initial = window.append(created.as_trade_event(), sol_usd_rate);
        Self {
            mint: created.mint.clone(),
            symbol: created.symbol.clone(),
            name: created.name.clone(),
            created_at: created.timestamp,
            last_trade_at: created.timestamp,
            window,
            snapshots: SnapshotSet::new(),
            lifecycle: LifecycleState::Active,
            completion: None,
            latest_market_cap_usd: initial.market_cap_usd,
            peak_market_cap_usd: initial.market_cap_usd,
            total_buys: 0,
            total_sells: 0,
            feed_gaps: 0,
            first_acceleration: None,
        }
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_trade_at(&self) -> DateTime<Utc> {
        self.last_trade_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_trade_at
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == LifecycleState::Active
    }

    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    pub fn window(&self) -> &TradeWindow {
        &self.window
    }

    pub fn trade_log(&self) -> impl Iterator<Item = &TradeEvent> {
        self.window.trade_log().iter()
    }

    pub fn price_history(&self) -> &std::collections::VecDeque<PricePoint> {
        self.window.price_history()
    }

    pub fn snapshots(&self) -> &SnapshotSet {
        &self.snapshots
    }

    pub fn latest_market_cap_usd(&self) -> f64 {
        self.latest_market_cap_usd
    }

    pub fn peak_market_cap_usd(&self) -> f64 {
        self.peak_market_cap_usd
    }

    pub fn total_buys(&self) -> u64 {
        self.total_buys
    }

    pub fn total_sells(&self) -> u64 {
        self.total_sells
    }

    pub fn feed_gaps(&self) -> u32 {
        self.feed_gaps
    }

    pub fn first_acceleration(&self) -> Option<&AccelerationMark> {
        self.first_acceleration.as_ref()
    }

    /// Append a trade to the rolling windows. Returns `false` (and changes
    /// nothing) when the token is already completed.
    pub fn record_trade(&mut self, event: TradeEvent, sol_usd_rate: f64) -> bool {
        if !self.is_active() {
            return false;
        }
        match event.kind {
            TradeKind::Buy => self.total_buys += 1,
            TradeKind::Sell => self.total_sells += 1,
            TradeKind::Create => {}
        }
        if event.timestamp > self.last_trade_at {
            self.last_trade_at = event.timestamp;
        }
        let point = self.window.append(event, sol_usd_rate);
        self.latest_market_cap_usd = point.market_cap_usd;
        if point.market_cap_usd > self.peak_market_cap_usd {
            self.peak_market_cap_usd = point.market_cap_usd;
        }
        true
    }

    pub fn freeze_snapshot(&mut self, label: &str, snapshot: Snapshot) -> bool {
        if !self.is_active() {
            return false;
        }
        self.snapshots.insert_once(label, snapshot)
    }

    /// Remember the first acceleration alert. Later calls are ignored.
    pub fn mark_acceleration(&mut self, mark: AccelerationMark) -> bool {
        if !self.is_active() || self.first_acceleration.is_some() {
            return false;
        }
        self.first_acceleration = Some(mark);
        true
    }

    pub fn note_feed_gap(&mut self) {
        if self.is_active() {
            self.feed_gaps += 1;
        }
    }

    /// Transition to `Completed` and build the finalized record.
    ///
    /// Returns `None` if the token was already completed; the first
    /// completion wins and is never overwritten.
    pub fn complete(
        &mut self,
        reason: CompletionReason,
        now: DateTime<Utc>,
        policy: &LifecyclePolicy,
    ) -> Option<TokenRecord> {
        if !self.is_active() {
            return None;
        }
        let final_market_cap_usd = self.latest_market_cap_usd;
        let completion = Completion {
            reason,
            final_market_cap_usd,
            completed_at: now,
            is_runner: is_runner(final_market_cap_usd, policy),
        };
        self.lifecycle = LifecycleState::Completed;
        self.completion = Some(completion.clone());

        Some(TokenRecord {
            mint: self.mint.clone(),
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            completed_at: now,
            completion_reason: reason,
            final_market_cap_usd,
            peak_market_cap_usd: self.peak_market_cap_usd,
            is_runner: completion.is_runner,
            observed_secs: duration_secs(self.age(now)),
            total_buys: self.total_buys,
            total_sells: self.total_sells,
            feed_gaps: self.feed_gaps,
            first_acceleration: self.first_acceleration,
            snapshots: self.snapshots.clone(),
        })
    }
}
