//! Reward shaping for routing outcomes

use serde::{Deserialize, Serialize};

use qroute_core::RewardConfig;

use crate::action::{RoutingAction, RoutingStrategy};
use crate::state::Reward;

/// Measurements fed back after a routed request completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    /// Seconds
    pub response_time: f64,
    /// 0-1
    pub quality_score: f64,
    /// 0-1, higher is cheaper for the quality obtained
    pub cost_efficiency: f64,
}

/// Whether the routed request succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl RoutingOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Shape a reward from an outcome and its metrics.
///
/// Success scores `1.0` plus a linear quality term, a cost term, a latency
/// bonus below `latency_threshold` and a bonus for the performance strategy
/// when quality reaches `high_quality_threshold`. Failure scores
/// `-(failure_penalty + deviation_weight * (time_dev + quality_dev))`,
/// each deviation clamped to `[0, 1]`.
///
/// `quality_score` is clamped to `[0, 1]` first, NaN reading as `0`, so a
/// failure always scores below a success with the same metrics.
pub fn calculate_reward(
    config: &RewardConfig,
    action: &RoutingAction,
    outcome: &RoutingOutcome,
    metrics: &OutcomeMetrics,
) -> Reward {
    let quality = if metrics.quality_score.is_nan() {
        0.0
    } else {
        metrics.quality_score.clamp(0.0, 1.0)
    };

    if !outcome.success {
        let time_dev = if config.baseline_response_time > 0.0 {
            ((metrics.response_time - config.baseline_response_time) / config.baseline_response_time)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        let quality_dev = (config.baseline_quality - quality).clamp(0.0, 1.0);
        return -(config.failure_penalty + config.deviation_weight * (time_dev + quality_dev));
    }

    let mut reward = 1.0;
    reward += config.quality_weight * (quality - config.baseline_quality);
    reward += config.cost_weight * metrics.cost_efficiency;

    if metrics.response_time < config.latency_threshold {
        reward += config.latency_bonus;
    }

    if action.strategy == RoutingStrategy::Performance && quality >= config.high_quality_threshold
    {
        reward += config.performance_strategy_bonus;
    }

    reward
}
