use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Create,
    Buy,
    Sell,
}

impl TradeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Some(TradeKind::Create),
            "buy" => Some(TradeKind::Buy),
            "sell" => Some(TradeKind::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Create => write!(f, "create"),
            TradeKind::Buy => write!(f, "buy"),
            TradeKind::Sell => write!(f, "sell"),
        }
    }
}

/// A single trade observed on the feed. Timestamps are arrival time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub mint: String,
    pub kind: TradeKind,
    pub market_cap_sol: f64,
    #[serde(default)]
    pub trader: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn market_cap_usd(&self, sol_usd_rate: f64) -> f64 {
        self.market_cap_sol * sol_usd_rate
    }
}

/// First sighting of a token on the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCreated {
    pub mint: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub initial_market_cap_sol: f64,
    #[serde(default)]
    pub creator: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TokenCreated {
    /// The creation itself as a `create` trade, so it lands in the trade log and price history.
    pub fn as_trade_event(&self) -> TradeEvent {
        TradeEvent {
            mint: self.mint.clone(),
            kind: TradeKind::Create,
            market_cap_sol: self.initial_market_cap_sol,
            trader: self.creator.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub market_cap_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Distinct trader count. `Approximate` is an upper bound equal to the
/// transaction count, used when the feed did not identify every trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "count", rename_all = "lowercase")]
pub enum TraderCount {
    Exact(usize),
    Approximate(usize),
}

impl TraderCount {
    pub fn count(&self) -> usize {
        match self {
            TraderCount::Exact(n) | TraderCount::Approximate(n) => *n,
        }
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, TraderCount::Approximate(_))
    }
}

/// Frozen statistics for one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub checkpoint: String,
    pub checkpoint_secs: u64,
    pub age_secs: f64,
    pub txn: usize,
    pub buys: usize,
    pub sells: usize,
    pub buy_ratio: f64,
    pub traders: TraderCount,
    pub market_cap_usd: f64,
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
    pub is_accelerating: bool,
    pub captured_at: DateTime<Utc>,
}

/// Checkpoint label -> snapshot, kept in the order checkpoints were frozen
/// (ascending by threshold). Serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    entries: Vec<(String, Snapshot)>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&Snapshot> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, s)| s)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    /// Store a snapshot unless one is already frozen under `label`.
    /// Returns whether it was stored.
    pub fn insert_once(&mut self, label: &str, snapshot: Snapshot) -> bool {
        if self.contains(label) {
            return false;
        }
        self.entries.push((label.to_string(), snapshot));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Snapshot)> {
        self.entries.iter().map(|(l, s)| (l.as_str(), s))
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(l, _)| l.as_str()).collect()
    }
}

impl Serialize for SnapshotSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, snapshot) in &self.entries {
            map.serialize_entry(label, snapshot)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SnapshotSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnapshotSetVisitor;

        impl<'de> Visitor<'de> for SnapshotSetVisitor {
            type Value = SnapshotSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of checkpoint label to snapshot")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SnapshotSet, A::Error> {
                let mut set = SnapshotSet::new();
                while let Some((label, snapshot)) = access.next_entry::<String, Snapshot>()? {
                    set.insert_once(&label, snapshot);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(SnapshotSetVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    TargetReached,
    MaxAge,
    Inactive,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::TargetReached => write!(f, "target_reached"),
            CompletionReason::MaxAge => write!(f, "max_age"),
            CompletionReason::Inactive => write!(f, "inactive"),
        }
    }
}

/// Where a token stood the first time its momentum was flagged as accelerating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationMark {
    pub age_secs: f64,
    pub market_cap_usd: f64,
    pub velocity: f64,
    pub accel_rate: f64,
}

/// Finalized record of a completed token, handed to the completion sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub mint: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub completion_reason: CompletionReason,
    pub final_market_cap_usd: f64,
    pub peak_market_cap_usd: f64,
    pub is_runner: bool,
    pub observed_secs: f64,
    pub total_buys: u64,
    pub total_sells: u64,
    pub feed_gaps: u32,
    #[serde(default)]
    pub first_acceleration: Option<AccelerationMark>,
    pub snapshots: SnapshotSet,
}
