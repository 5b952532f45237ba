// Feed connection model: reconnect state machine, backoff and the
// per-token subscription set replayed after every reconnect

use chrono::{DateTime, Duration, Utc};
use log::debug;
use rand::Rng;
use serde_json::json;
use std::collections::BTreeSet;

/// Maximum extra delay added on top of the nominal backoff, as a fraction.
pub const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Subscribed { since: DateTime<Utc> },
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`, plus up to
/// [`JITTER_FRACTION`] jitter (the result never exceeds `max`).
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: std::time::Duration,
    max: std::time::Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: std::time::Duration::from_millis(base_ms.max(1)),
            max: std::time::Duration::from_millis(max_ms.max(base_ms.max(1))),
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt before jitter.
    pub fn nominal(&self) -> std::time::Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay to wait now; advances to the next attempt.
    pub fn next_delay(&mut self) -> std::time::Duration {
        let nominal = self.nominal();
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        self.attempt = self.attempt.saturating_add(1);
        nominal.mul_f64(1.0 + jitter).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Drives `Disconnected -> Connecting -> Subscribed` and measures outages.
#[derive(Debug, Clone)]
pub struct FeedConnection {
    state: ConnectionState,
    backoff: ReconnectBackoff,
    dropped_at: Option<DateTime<Utc>>,
}

impl FeedConnection {
    pub fn new(backoff: ReconnectBackoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
            dropped_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn on_connecting(&mut self) {
        self.state = ConnectionState::Connecting {
            attempt: self.backoff.attempt(),
        };
    }

    /// Every subscription was sent. Resets the backoff. Returns the outage
    /// length when this follows a dropped subscribed connection.
    pub fn on_subscribed(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.state = ConnectionState::Subscribed { since: now };
        self.backoff.reset();
        self.dropped_at.take().map(|at| now - at)
    }

    /// The transport failed or closed. Returns `true` when a subscribed
    /// connection was lost, which is when a feed gap begins.
    pub fn on_disconnected(&mut self, now: DateTime<Utc>) -> bool {
        let was_subscribed = matches!(self.state, ConnectionState::Subscribed { .. });
        self.state = ConnectionState::Disconnected;
        if was_subscribed {
            self.dropped_at = Some(now);
        }
        was_subscribed
    }

    pub fn next_delay(&mut self) -> std::time::Duration {
        self.backoff.next_delay()
    }
}

/// Subscribe/unsubscribe request from the tracker loop to the websocket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRequest {
    Subscribe(String),
    Unsubscribe(String),
}

/// Token ids whose trade streams are currently subscribed.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    keys: BTreeSet<String>,
    batch_size: usize,
}

impl SubscriptionSet {
    pub fn new(batch_size: usize) -> Self {
        Self {
            keys: BTreeSet::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn insert(&mut self, id: &str) -> bool {
        self.keys.insert(id.to_string())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.keys.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Apply a request. Returns the payload to send, or `None` when the set
    /// already reflected it.
    pub fn apply(&mut self, request: &SubscriptionRequest) -> Option<String> {
        match request {
            SubscriptionRequest::Subscribe(id) => self
                .insert(id)
                .then(|| subscribe_trades_payload(std::slice::from_ref(id))),
            SubscriptionRequest::Unsubscribe(id) => self
                .remove(id)
                .then(|| unsubscribe_trades_payload(std::slice::from_ref(id))),
        }
    }

    /// Messages to send after (re)connecting: new-token subscription first,
    /// then the trade subscriptions in batches.
    pub fn replay_payloads(&self) -> Vec<String> {
        let keys: Vec<String> = self.keys.iter().cloned().collect();
        let mut payloads = Vec::with_capacity(1 + keys.len() / self.batch_size + 1);
        payloads.push(subscribe_new_token_payload());
        for chunk in keys.chunks(self.batch_size) {
            payloads.push(subscribe_trades_payload(chunk));
        }
        debug!(
            "Replaying {} trade subscriptions in {} batches",
            keys.len(),
            payloads.len() - 1
        );
        payloads
    }
}

pub fn subscribe_new_token_payload() -> String {
    json!({ "method": "subscribeNewToken" }).to_string()
}

pub fn subscribe_trades_payload(keys: &[String]) -> String {
    json!({ "method": "subscribeTokenTrade", "keys": keys }).to_string()
}

pub fn unsubscribe_trades_payload(keys: &[String]) -> String {
    json!({ "method": "unsubscribeTokenTrade", "keys": keys }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_backoff_doubles_and_is_bounded() {
        let mut backoff = ReconnectBackoff::new(1_000, 30_000);
        let mut nominals = Vec::new();
        for _ in 0..8 {
            let nominal = backoff.nominal();
            let delay = backoff.next_delay();
            assert!(delay >= nominal);
            assert!(delay <= StdDuration::from_millis(30_000));
            assert!(delay <= nominal.mul_f64(1.0 + JITTER_FRACTION) + StdDuration::from_millis(1));
            nominals.push(nominal.as_millis());
        }
        assert_eq!(nominals, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]);
    }

    #[test]
    fn test_backoff_resets() {
        let mut backoff = ReconnectBackoff::new(500, 10_000);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.nominal(), StdDuration::from_millis(2_000));
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.nominal(), StdDuration::from_millis(500));
    }

    #[test]
    fn test_connection_reports_outage_after_drop() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut conn = FeedConnection::new(ReconnectBackoff::new(1_000, 30_000));
        conn.on_connecting();
        assert_eq!(conn.state(), ConnectionState::Connecting { attempt: 0 });
        assert_eq!(conn.on_subscribed(t0), None);

        assert!(conn.on_disconnected(t0 + Duration::seconds(10)));
        conn.next_delay();
        conn.on_connecting();
        assert_eq!(conn.state(), ConnectionState::Connecting { attempt: 1 });
        // a failed connect attempt is not a second gap
        assert!(!conn.on_disconnected(t0 + Duration::seconds(12)));
        conn.next_delay();
        conn.on_connecting();

        let outage = conn.on_subscribed(t0 + Duration::seconds(17));
        assert_eq!(outage, Some(Duration::seconds(7)));
        assert_eq!(
            conn.state(),
            ConnectionState::Subscribed {
                since: t0 + Duration::seconds(17)
            }
        );
        conn.on_connecting();
        assert_eq!(conn.state(), ConnectionState::Connecting { attempt: 0 });
    }

    #[test]
    fn test_replay_chunks_by_batch_size() {
        let mut subs = SubscriptionSet::new(2);
        for id in ["a", "b", "c", "d", "e"] {
            subs.insert(id);
        }
        let payloads = subs.replay_payloads();
        assert_eq!(payloads.len(), 4);
        assert_eq!(payloads[0], r#"{"method":"subscribeNewToken"}"#);

        let batches: Vec<Vec<String>> = payloads[1..]
            .iter()
            .map(|p| {
                let v: serde_json::Value = serde_json::from_str(p).unwrap();
                assert_eq!(v["method"], "subscribeTokenTrade");
                serde_json::from_value(v["keys"].clone()).unwrap()
            })
            .collect();
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
    }

    #[test]
    fn test_empty_set_replays_only_new_token_subscription() {
        let subs = SubscriptionSet::new(50);
        assert_eq!(subs.replay_payloads(), vec![subscribe_new_token_payload()]);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut subs = SubscriptionSet::new(10);
        let first = subs.apply(&SubscriptionRequest::Subscribe("m".to_string()));
        assert!(first.unwrap().contains("subscribeTokenTrade"));
        assert!(subs.apply(&SubscriptionRequest::Subscribe("m".to_string())).is_none());
        let removed = subs.apply(&SubscriptionRequest::Unsubscribe("m".to_string()));
        assert!(removed.unwrap().contains("unsubscribeTokenTrade"));
        assert!(subs.apply(&SubscriptionRequest::Unsubscribe("m".to_string())).is_none());
        assert!(subs.is_empty());
    }
}
