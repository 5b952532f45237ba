use crate::checkpoint::{
    bounded_seconds, default_checkpoint_labels, parse_checkpoints, Checkpoint, MAX_DURATION_SECS,
};
use crate::error::CoreError;
use crate::lifecycle::LifecyclePolicy;
use crate::velocity::VelocityPolicy;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overriding any setting, e.g.
/// `LAUNCH_TRACKER_SOL_USD_RATE=180`.
#[cfg(feature = "native")]
pub const ENV_PREFIX: &str = "LAUNCH_TRACKER";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub feed_ws_url: String,
    /// Fixed SOL -> USD conversion applied to every feed market cap.
    pub sol_usd_rate: f64,
    pub checkpoints: Vec<String>,
    /// Trailing window kept in `price_history`.
    pub velocity_window_secs: u64,
    pub velocity_baseline_secs: u64,
    pub accel_min_gain_pct: f64,
    pub accel_min_velocity_usd: f64,
    pub accel_fallback_min_gain_pct: f64,
    /// Window for snapshot statistics. `None` means the token's whole lifetime.
    pub snapshot_window_secs: Option<u64>,
    pub trade_log_capacity: usize,
    /// Final market cap at or above this marks the token as a runner.
    pub runner_threshold_usd: f64,
    /// Market cap above this completes observation early.
    pub completion_target_usd: f64,
    pub max_age_secs: u64,
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_active_tokens: usize,
    pub completed_cache_capacity: usize,
    pub subscription_batch_size: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub channel_capacity: usize,
    pub stats_interval_secs: u64,
    pub store_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_ws_url: default_feed_ws_url(),
            sol_usd_rate: 150.0,
            checkpoints: default_checkpoint_labels(),
            velocity_window_secs: 30,
            velocity_baseline_secs: 10,
            accel_min_gain_pct: 10.0,
            accel_min_velocity_usd: 100.0,
            accel_fallback_min_gain_pct: 15.0,
            snapshot_window_secs: None,
            trade_log_capacity: 5_000,
            runner_threshold_usd: 15_000.0,
            completion_target_usd: 25_000.0,
            max_age_secs: 600,
            inactivity_timeout_secs: 180,
            sweep_interval_secs: 5,
            max_active_tokens: 200,
            completed_cache_capacity: 10_000,
            subscription_batch_size: 50,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            channel_capacity: 10_000,
            stats_interval_secs: 60,
            store_path: "token_records.json".to_string(),
        }
    }
}

fn default_feed_ws_url() -> String {
    "wss://pumpportal.fun/api/data".to_string()
}

impl Settings {
    #[cfg(feature = "native")]
    pub fn from_file(path: &str) -> Result<Self, CoreError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), CoreError> {
        let toml_string = toml::to_string(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate settings ranges and constraints
    pub fn validate(&self) -> Result<(), CoreError> {
        let url = url::Url::parse(&self.feed_ws_url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(CoreError::Validation(format!(
                "feed_ws_url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if !(self.sol_usd_rate > 0.0) {
            return Err(CoreError::Validation("sol_usd_rate must be > 0".to_string()));
        }
        parse_checkpoints(&self.checkpoints)?;
        self.check_duration_ranges()?;
        if self.velocity_baseline_secs == 0 {
            return Err(CoreError::Validation("velocity_baseline_secs must be > 0".to_string()));
        }
        if self.velocity_window_secs < self.velocity_baseline_secs.saturating_mul(2) {
            return Err(CoreError::Validation(
                "velocity_window_secs must be >= 2 * velocity_baseline_secs".to_string(),
            ));
        }
        if self.snapshot_window_secs == Some(0) {
            return Err(CoreError::Validation("snapshot_window_secs must be > 0 when set".to_string()));
        }
        if self.trade_log_capacity == 0 {
            return Err(CoreError::Validation("trade_log_capacity must be > 0".to_string()));
        }
        if !(self.runner_threshold_usd > 0.0) {
            return Err(CoreError::Validation("runner_threshold_usd must be > 0".to_string()));
        }
        if !(self.completion_target_usd > 0.0) {
            return Err(CoreError::Validation("completion_target_usd must be > 0".to_string()));
        }
        if self.max_age_secs == 0 {
            return Err(CoreError::Validation("max_age_secs must be > 0".to_string()));
        }
        if self.inactivity_timeout_secs == 0 {
            return Err(CoreError::Validation("inactivity_timeout_secs must be > 0".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(CoreError::Validation("sweep_interval_secs must be > 0".to_string()));
        }
        if self.stats_interval_secs == 0 {
            return Err(CoreError::Validation("stats_interval_secs must be > 0".to_string()));
        }
        if self.max_active_tokens == 0 {
            return Err(CoreError::Validation("max_active_tokens must be > 0".to_string()));
        }
        if self.completed_cache_capacity == 0 {
            return Err(CoreError::Validation("completed_cache_capacity must be > 0".to_string()));
        }
        if self.subscription_batch_size == 0 {
            return Err(CoreError::Validation("subscription_batch_size must be > 0".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(CoreError::Validation("channel_capacity must be > 0".to_string()));
        }
        if self.reconnect_base_ms == 0 || self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(CoreError::Validation(
                "reconnect_base_ms must be > 0 and <= reconnect_max_ms".to_string(),
            ));
        }
        if self.store_path.trim().is_empty() {
            return Err(CoreError::Validation("store_path must not be empty".to_string()));
        }
        Ok(())
    }

    fn check_duration_ranges(&self) -> Result<(), CoreError> {
        let secs = [
            ("velocity_window_secs", self.velocity_window_secs),
            ("velocity_baseline_secs", self.velocity_baseline_secs),
            ("snapshot_window_secs", self.snapshot_window_secs.unwrap_or(0)),
            ("max_age_secs", self.max_age_secs),
            ("inactivity_timeout_secs", self.inactivity_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("stats_interval_secs", self.stats_interval_secs),
        ];
        for (name, value) in secs {
            if value > MAX_DURATION_SECS {
                return Err(CoreError::Validation(format!(
                    "{} must be <= {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        let max_ms = MAX_DURATION_SECS * 1000;
        if self.reconnect_max_ms > max_ms {
            return Err(CoreError::Validation(format!(
                "reconnect_max_ms must be <= {}",
                max_ms
            )));
        }
        Ok(())
    }

    pub fn parsed_checkpoints(&self) -> Result<Vec<Checkpoint>, CoreError> {
        parse_checkpoints(&self.checkpoints)
    }

    pub fn velocity_policy(&self) -> VelocityPolicy {
        VelocityPolicy {
            baseline: bounded_seconds(self.velocity_baseline_secs),
            min_gain_pct: self.accel_min_gain_pct,
            min_velocity_usd: self.accel_min_velocity_usd,
            fallback_min_gain_pct: self.accel_fallback_min_gain_pct,
        }
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            completion_target_usd: self.completion_target_usd,
            runner_threshold_usd: self.runner_threshold_usd,
            max_age: bounded_seconds(self.max_age_secs),
            inactivity_timeout: bounded_seconds(self.inactivity_timeout_secs),
        }
    }

    pub fn velocity_window(&self) -> Duration {
        bounded_seconds(self.velocity_window_secs)
    }

    pub fn snapshot_window(&self) -> Option<Duration> {
        self.snapshot_window_secs.map(bounded_seconds)
    }
}
