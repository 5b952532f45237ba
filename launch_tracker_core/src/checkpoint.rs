// Checkpoint labels ("10s", "1min", ...) and their age thresholds

use crate::error::CoreError;
use chrono::Duration;

/// Upper bound for any configured age or interval, in seconds (100 years).
/// Keeps timestamp arithmetic and `Duration` construction in range.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

/// `Duration` from a configured second count, clamped to [`MAX_DURATION_SECS`].
pub fn bounded_seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

pub const DEFAULT_CHECKPOINTS: [&str; 11] = [
    "10s", "15s", "20s", "30s", "1min", "2min", "3min", "5min", "8min", "10min", "15min",
];

/// A fixed elapsed-age boundary at which a snapshot is frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub label: String,
    pub threshold_secs: u64,
}

impl Checkpoint {
    /// Parse a label such as `15s`, `90s`, `2m`, `1min` or `1h`.
    ///
    /// The label is kept verbatim (trimmed) so it can be used as the snapshot key.
    pub fn parse(label: &str) -> Result<Self, CoreError> {
        let label = label.trim();
        let split = label
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| CoreError::Checkpoint(format!("`{}` has no unit", label)))?;
        let (digits, unit) = label.split_at(split);
        if digits.is_empty() {
            return Err(CoreError::Checkpoint(format!("`{}` has no amount", label)));
        }
        let amount: u64 = digits
            .parse()
            .map_err(|e| CoreError::Checkpoint(format!("`{}`: {}", label, e)))?;
        let multiplier = match unit {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hour" => 3600,
            other => {
                return Err(CoreError::Checkpoint(format!(
                    "`{}` has unknown unit `{}`",
                    label, other
                )))
            }
        };
        if amount == 0 {
            return Err(CoreError::Checkpoint(format!("`{}` must be > 0", label)));
        }
        let threshold_secs = amount
            .checked_mul(multiplier)
            .filter(|secs| *secs <= MAX_DURATION_SECS)
            .ok_or_else(|| {
                CoreError::Checkpoint(format!(
                    "`{}` exceeds the {}s limit",
                    label, MAX_DURATION_SECS
                ))
            })?;
        Ok(Self {
            label: label.to_string(),
            threshold_secs,
        })
    }

    pub fn threshold(&self) -> Duration {
        bounded_seconds(self.threshold_secs)
    }

    /// True once a token of the given age has crossed this checkpoint.
    pub fn is_due(&self, age: Duration) -> bool {
        age >= self.threshold()
    }
}

/// Parse a list of labels, requiring strictly ascending thresholds.
pub fn parse_checkpoints<S: AsRef<str>>(labels: &[S]) -> Result<Vec<Checkpoint>, CoreError> {
    if labels.is_empty() {
        return Err(CoreError::Checkpoint("checkpoint list is empty".to_string()));
    }
    let mut parsed: Vec<Checkpoint> = Vec::with_capacity(labels.len());
    for label in labels {
        let cp = Checkpoint::parse(label.as_ref())?;
        if let Some(prev) = parsed.last() {
            if cp.threshold_secs <= prev.threshold_secs {
                return Err(CoreError::Checkpoint(format!(
                    "`{}` ({}s) must come after `{}` ({}s)",
                    cp.label, cp.threshold_secs, prev.label, prev.threshold_secs
                )));
            }
        }
        parsed.push(cp);
    }
    Ok(parsed)
}

pub fn default_checkpoint_labels() -> Vec<String> {
    DEFAULT_CHECKPOINTS.iter().map(|s| s.to_string()).collect()
}
