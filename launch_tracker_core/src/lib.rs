// Launch Tracker Core Library
// Per-token snapshot tracking for newly launched bonding-curve tokens

pub mod checkpoint;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod settings;
pub mod sink;
pub mod state;
pub mod stats;
pub mod tracker;
pub mod velocity;
pub mod window;

#[cfg(feature = "native")]
pub mod native;

// Re-exports
pub use checkpoint::Checkpoint;
pub use error::{CoreError, FeedParseError};
pub use feed::{FeedEvent, FeedSignal};
pub use models::*;
pub use settings::Settings;
pub use sink::{CompletionSink, MemorySink};
pub use state::TokenState;
pub use stats::{StatsSnapshot, TrackerStats};
pub use tracker::{CreateOutcome, TradeOutcome, Tracker};
