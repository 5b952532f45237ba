// Two-point finite-difference momentum estimate over the trailing market-cap history

use crate::models::PricePoint;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Thresholds for the acceleration flag. Tunable policy, not contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityPolicy {
    /// Sampling baseline. `p10` is the latest sample at least one baseline
    /// older than the newest point, `p20` at least two baselines older.
    pub baseline: Duration,
    pub min_gain_pct: f64,
    pub min_velocity_usd: f64,
    /// Gain required when no second baseline sample exists.
    pub fallback_min_gain_pct: f64,
}

impl Default for VelocityPolicy {
    fn default() -> Self {
        Self {
            baseline: Duration::seconds(10),
            min_gain_pct: 10.0,
            min_velocity_usd: 100.0,
            fallback_min_gain_pct: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityRule {
    /// Both `p10` and `p20` were usable.
    TwoPoint,
    /// Only `p10` was usable; acceleration reported as 0.
    SinglePoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocitySignal {
    /// USD per second over the baseline.
    pub velocity: f64,
    pub gain_pct: f64,
    pub accel_rate: f64,
    pub is_accelerating: bool,
    pub rule: VelocityRule,
}

/// Latest sample at least `min_gap` older than `current`, scanning newest first.
fn baseline_sample<'a, I>(mut samples: I, current: &PricePoint, min_gap: Duration) -> Option<&'a PricePoint>
where
    I: Iterator<Item = &'a PricePoint>,
{
    samples.find(|p| current.timestamp - p.timestamp >= min_gap)
}

/// Estimate velocity and acceleration from the price history.
///
/// Returns `None` ("no signal") when there is no sample one baseline older
/// than the newest point, or that sample's market cap is zero. Velocity
/// divides by the nominal baseline, not by the actual sample spacing, so it
/// is sensitive to sampling jitter.
pub fn compute_velocity<'a, I>(history: I, policy: &VelocityPolicy) -> Option<VelocitySignal>
where
    I: IntoIterator<Item = &'a PricePoint>,
    I::IntoIter: DoubleEndedIterator + Clone,
{
    let iter = history.into_iter();
    let mut newest_first = iter.rev();
    let current = newest_first.next()?;

    let baseline_secs = policy.baseline.num_milliseconds() as f64 / 1000.0;
    if baseline_secs <= 0.0 {
        return None;
    }

    let p10 = baseline_sample(newest_first.clone(), current, policy.baseline)?;
    if p10.market_cap_usd == 0.0 {
        return None;
    }

    let gain = current.market_cap_usd - p10.market_cap_usd;
    let gain_pct = gain / p10.market_cap_usd * 100.0;
    let velocity = gain / baseline_secs;

    let p20 = baseline_sample(newest_first, current, policy.baseline * 2)
        .filter(|p| p.market_cap_usd != 0.0);

    let signal = match p20 {
        Some(p20) => {
            let velocity_prev = (p10.market_cap_usd - p20.market_cap_usd) / baseline_secs;
            let accel_rate = velocity - velocity_prev;
            VelocitySignal {
                velocity,
                gain_pct,
                accel_rate,
                is_accelerating: gain_pct >= policy.min_gain_pct
                    && velocity > policy.min_velocity_usd
                    && accel_rate > 0.0,
                rule: VelocityRule::TwoPoint,
            }
        }
        None => VelocitySignal {
            velocity,
            gain_pct,
            accel_rate: 0.0,
            is_accelerating: gain_pct >= policy.fallback_min_gain_pct
                && velocity > policy.min_velocity_usd,
            rule: VelocityRule::SinglePoint,
        },
    };
    Some(signal)
}
