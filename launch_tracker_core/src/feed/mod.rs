// Feed-facing types: normalized events and connection signals

pub mod connection;
pub mod message;

pub use connection::{
    subscribe_new_token_payload, subscribe_trades_payload, unsubscribe_trades_payload,
    ConnectionState, FeedConnection, ReconnectBackoff, SubscriptionRequest, SubscriptionSet,
};
pub use message::parse_message;

use crate::models::{TokenCreated, TradeEvent};
use chrono::{DateTime, Duration, Utc};

/// A feed message after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Created(TokenCreated),
    Trade(TradeEvent),
}

impl FeedEvent {
    pub fn mint(&self) -> &str {
        match self {
            FeedEvent::Created(c) => &c.mint,
            FeedEvent::Trade(t) => &t.mint,
        }
    }
}

/// What the websocket task hands to the tracker loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    Event(FeedEvent),
    /// The transport dropped after having been subscribed.
    Disconnected { at: DateTime<Utc> },
    /// Subscriptions were replayed after a drop. Trades during `outage` are lost.
    Reconnected {
        at: DateTime<Utc>,
        outage: Duration,
    },
}
