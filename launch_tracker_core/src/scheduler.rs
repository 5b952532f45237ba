// Checkpoint scheduler: freezes due snapshots on trade events

use crate::checkpoint::Checkpoint;
use crate::metrics::{compute_metrics, lifetime_metrics};
use crate::models::Snapshot;
use crate::state::{duration_secs, TokenState};
use crate::velocity::{compute_velocity, VelocityPolicy, VelocitySignal};
use chrono::{DateTime, Duration, Utc};
use log::debug;

#[derive(Debug, Clone)]
pub struct SnapshotScheduler {
    checkpoints: Vec<Checkpoint>,
    snapshot_window: Option<Duration>,
    velocity: VelocityPolicy,
}

impl SnapshotScheduler {
    /// `checkpoints` must already be validated as strictly ascending.
    pub fn new(
        checkpoints: Vec<Checkpoint>,
        snapshot_window: Option<Duration>,
        velocity: VelocityPolicy,
    ) -> Self {
        Self {
            checkpoints,
            snapshot_window,
            velocity,
        }
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn velocity_policy(&self) -> &VelocityPolicy {
        &self.velocity
    }

    pub fn signal(&self, state: &TokenState) -> Option<VelocitySignal> {
        compute_velocity(state.price_history(), &self.velocity)
    }

    /// Build the snapshot for `checkpoint` from the state as it is right now.
    pub fn capture(
        &self,
        state: &TokenState,
        checkpoint: &Checkpoint,
        signal: Option<&VelocitySignal>,
        now: DateTime<Utc>,
    ) -> Snapshot {
        let age = state.age(now);
        let metrics = match self.snapshot_window {
            Some(window) => compute_metrics(state, window, now),
            None => lifetime_metrics(state, now),
        };
        Snapshot {
            checkpoint: checkpoint.label.clone(),
            checkpoint_secs: checkpoint.threshold_secs,
            age_secs: duration_secs(age),
            txn: metrics.txn,
            buys: metrics.buys,
            sells: metrics.sells,
            buy_ratio: metrics.buy_ratio,
            traders: metrics.traders,
            market_cap_usd: state.latest_market_cap_usd(),
            velocity: signal.map(|s| s.velocity),
            acceleration: signal.map(|s| s.accel_rate),
            is_accelerating: signal.map(|s| s.is_accelerating).unwrap_or(false),
            captured_at: now,
        }
    }

    /// Freeze every checkpoint whose threshold the token has reached and that
    /// is not yet frozen, in ascending order. Returns the labels frozen now.
    ///
    /// Checkpoints crossed between two trades are all frozen from the state
    /// at the later trade.
    pub fn freeze_due(&self, state: &mut TokenState, now: DateTime<Utc>) -> Vec<String> {
        if !state.is_active() {
            return Vec::new();
        }
        let age = state.age(now);
        let due: Vec<&Checkpoint> = self
            .checkpoints
            .iter()
            .take_while(|cp| cp.is_due(age))
            .filter(|cp| !state.snapshots().contains(&cp.label))
            .collect();
        if due.is_empty() {
            return Vec::new();
        }

        let signal = self.signal(state);
        let mut frozen = Vec::with_capacity(due.len());
        for cp in due {
            let snapshot = self.capture(state, cp, signal.as_ref(), now);
            if state.freeze_snapshot(&cp.label, snapshot) {
                debug!(
                    "{} ({}) snapshot {} frozen at age {:.1}s",
                    state.symbol(),
                    state.mint(),
                    cp.label,
                    duration_secs(age)
                );
                frozen.push(cp.label.clone());
            }
        }
        frozen
    }
}
