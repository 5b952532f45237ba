// Windowed trade statistics

use crate::models::{TradeEvent, TradeKind, TraderCount};
use crate::state::TokenState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    /// Buys plus sells. The creation event is not a transaction.
    pub txn: usize,
    pub buys: usize,
    pub sells: usize,
    /// `buys / txn`, or 0 when the window holds no transactions.
    pub buy_ratio: f64,
    pub traders: TraderCount,
}

impl WindowMetrics {
    pub fn empty() -> Self {
        Self {
            txn: 0,
            buys: 0,
            sells: 0,
            buy_ratio: 0.0,
            traders: TraderCount::Exact(0),
        }
    }
}

/// Statistics over the token's trades with `now - timestamp <= window`.
pub fn compute_metrics(state: &TokenState, window: Duration, now: DateTime<Utc>) -> WindowMetrics {
    aggregate(state.window().trades_within(window, now))
}

/// Statistics over the token's whole life.
///
/// Once the capped trade log has dropped old entries, counts come from the
/// token's lifetime counters and the trader count becomes approximate.
pub fn lifetime_metrics(state: &TokenState, now: DateTime<Utc>) -> WindowMetrics {
    let logged = compute_metrics(state, state.age(now), now);
    let buys = state.total_buys() as usize;
    let sells = state.total_sells() as usize;
    let txn = buys + sells;
    if txn <= logged.txn {
        return logged;
    }
    WindowMetrics {
        txn,
        buys,
        sells,
        buy_ratio: buys as f64 / txn as f64,
        traders: TraderCount::Approximate(txn),
    }
}

/// Fold a set of trades into counts. Creation events are skipped.
pub fn aggregate<'a, I>(trades: I) -> WindowMetrics
where
    I: IntoIterator<Item = &'a TradeEvent>,
{
    let mut buys = 0usize;
    let mut sells = 0usize;
    let mut traders: HashSet<&str> = HashSet::new();
    let mut anonymous = false;

    for trade in trades {
        match trade.kind {
            TradeKind::Buy => buys += 1,
            TradeKind::Sell => sells += 1,
            TradeKind::Create => continue,
        }
        match trade.trader.as_deref() {
            Some(id) if !id.is_empty() => {
                traders.insert(id);
            }
            _ => anonymous = true,
        }
    }

    let txn = buys + sells;
    if txn == 0 {
        return WindowMetrics::empty();
    }

    let traders = if anonymous {
        TraderCount::Approximate(txn)
    } else {
        TraderCount::Exact(traders.len())
    };

    WindowMetrics {
        txn,
        buys,
        sells,
        buy_ratio: buys as f64 / txn as f64,
        traders,
    }
}
