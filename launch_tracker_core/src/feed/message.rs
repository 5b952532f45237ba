// PumpPortal message adapter
//
// Creation messages carry `txType: "create"`, trade messages `"buy"`/`"sell"`.
// Subscription acknowledgements (`{"message": ...}`) and `errors` payloads are
// control traffic and produce no event.

use super::FeedEvent;
use crate::error::FeedParseError;
use crate::models::{TokenCreated, TradeEvent, TradeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_SYMBOL: &str = "???";

/// Raw PumpPortal payload. Every field is optional so that shape checks
/// produce a specific [`FeedParseError`] instead of a serde message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpPortalMessage {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub mint: Option<String>,
    /// Creator on `create`, trader on `buy`/`sell`
    #[serde(default)]
    pub trader_public_key: Option<String>,
    #[serde(default, rename = "txType")]
    pub tx_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub sol_amount: Option<f64>,
    #[serde(default)]
    pub market_cap_sol: Option<f64>,
    /// Subscription acknowledgement text
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl PumpPortalMessage {
    pub fn is_control(&self) -> bool {
        self.tx_type.is_none() && (self.message.is_some() || self.errors.is_some())
    }
}

fn checked_market_cap(value: f64) -> Result<f64, FeedParseError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(FeedParseError::InvalidMarketCap(value))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Normalize one inbound text frame, stamping events with `now`.
pub fn parse_message(text: &str, now: DateTime<Utc>) -> Result<Option<FeedEvent>, FeedParseError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FeedParseError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(FeedParseError::NotAnObject);
    }
    let msg: PumpPortalMessage =
        serde_json::from_value(value).map_err(|e| FeedParseError::InvalidJson(e.to_string()))?;

    if msg.is_control() {
        return Ok(None);
    }

    let tx_type = msg
        .tx_type
        .as_deref()
        .ok_or(FeedParseError::MissingField("txType"))?;
    let kind = TradeKind::parse(tx_type).ok_or_else(|| FeedParseError::UnknownKind(tx_type.to_string()))?;
    let mint = non_empty(msg.mint).ok_or(FeedParseError::MissingField("mint"))?;

    let event = match kind {
        TradeKind::Create => FeedEvent::Created(TokenCreated {
            mint,
            symbol: non_empty(msg.symbol).unwrap_or_else(|| UNKNOWN_SYMBOL.to_string()),
            name: non_empty(msg.name),
            initial_market_cap_sol: checked_market_cap(msg.market_cap_sol.unwrap_or(0.0))?,
            creator: non_empty(msg.trader_public_key),
            timestamp: now,
        }),
        TradeKind::Buy | TradeKind::Sell => {
            let market_cap_sol = msg
                .market_cap_sol
                .ok_or(FeedParseError::MissingField("marketCapSol"))?;
            FeedEvent::Trade(TradeEvent {
                mint,
                kind,
                market_cap_sol: checked_market_cap(market_cap_sol)?,
                trader: non_empty(msg.trader_public_key),
                timestamp: now,
            })
        }
    };
    Ok(Some(event))
}
