use crate::models::CompletionReason;
use crate::state::TokenState;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecyclePolicy {
    pub completion_target_usd: f64,
    pub runner_threshold_usd: f64,
    pub max_age: Duration,
    pub inactivity_timeout: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            completion_target_usd: 25_000.0,
            runner_threshold_usd: 15_000.0,
            max_age: Duration::seconds(600),
            inactivity_timeout: Duration::seconds(180),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LifecycleAction {
    Continue,
    Complete(CompletionReason),
}

/// Evaluate a token right after one of its trades was applied.
pub fn evaluate_on_trade(
    state: &TokenState,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> LifecycleAction {
    if !state.is_active() {
        return LifecycleAction::Continue;
    }

    if state.latest_market_cap_usd() > policy.completion_target_usd {
        LifecycleAction::Complete(CompletionReason::TargetReached)
    } else if state.age(now) >= policy.max_age {
        LifecycleAction::Complete(CompletionReason::MaxAge)
    } else {
        LifecycleAction::Continue
    }
}

/// Evaluate a token from the periodic sweep, with no trade in hand.
pub fn evaluate_on_sweep(
    state: &TokenState,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> LifecycleAction {
    if !state.is_active() {
        return LifecycleAction::Continue;
    }

    if state.age(now) >= policy.max_age {
        LifecycleAction::Complete(CompletionReason::MaxAge)
    } else if state.idle(now) >= policy.inactivity_timeout {
        LifecycleAction::Complete(CompletionReason::Inactive)
    } else {
        LifecycleAction::Continue
    }
}

pub fn is_runner(final_market_cap_usd: f64, policy: &LifecyclePolicy) -> bool {
    final_market_cap_usd >= policy.runner_threshold_usd
}
