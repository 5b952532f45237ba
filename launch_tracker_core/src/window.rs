// Per-token rolling windows: the trade log and the trailing market-cap history

use crate::models::{PricePoint, TradeEvent};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Append-only trade buffer for one token.
///
/// `append` is the only mutator. It pushes the trade onto the log (dropping
/// the oldest entry once `log_capacity` is reached) and records the trade's
/// market cap in `price_history`, evicting every point that falls outside
/// `price_window` relative to the new point.
#[derive(Debug, Clone)]
pub struct TradeWindow {
    trade_log: VecDeque<TradeEvent>,
    price_history: VecDeque<PricePoint>,
    log_capacity: usize,
    price_window: Duration,
}

impl TradeWindow {
    pub fn new(log_capacity: usize, price_window: Duration) -> Self {
        Self {
            trade_log: VecDeque::with_capacity(log_capacity.min(256)),
            price_history: VecDeque::new(),
            log_capacity: log_capacity.max(1),
            price_window,
        }
    }

    pub fn append(&mut self, event: TradeEvent, sol_usd_rate: f64) -> PricePoint {
        let point = PricePoint {
            market_cap_usd: event.market_cap_usd(sol_usd_rate),
            timestamp: event.timestamp,
        };

        if self.trade_log.len() >= self.log_capacity {
            self.trade_log.pop_front();
        }
        self.trade_log.push_back(event);

        self.price_history.push_back(point);
        let cutoff = point.timestamp - self.price_window;
        while let Some(front) = self.price_history.front() {
            if front.timestamp < cutoff {
                self.price_history.pop_front();
            } else {
                break;
            }
        }

        point
    }

    /// Trades with `now - timestamp <= window`, oldest first.
    pub fn trades_within(&self, window: Duration, now: DateTime<Utc>) -> Vec<&TradeEvent> {
        let cutoff = now - window;
        self.trade_log
            .iter()
            .filter(|t| t.timestamp >= cutoff && t.timestamp <= now)
            .collect()
    }

    pub fn trade_log(&self) -> &VecDeque<TradeEvent> {
        &self.trade_log
    }

    pub fn price_history(&self) -> &VecDeque<PricePoint> {
        &self.price_history
    }

    pub fn latest_price(&self) -> Option<&PricePoint> {
        self.price_history.back()
    }

    pub fn price_window(&self) -> Duration {
        self.price_window
    }
}
