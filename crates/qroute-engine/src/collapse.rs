//! Collapse strategies: reducing N variation outcomes to one

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use qroute_core::RouterError;

use crate::variation::VariationOutcome;

/// Maps a successful value to a score, higher is better
pub type ScoringFn<T> = Arc<dyn Fn(&T) -> f64 + Send + Sync>;

/// Decides whether two values agree for CONSENSUS grouping
pub type EquivalenceFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Reduction policy applied to the outcomes of one `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseStrategy {
    /// Return as soon as any variation succeeds, cancel the rest
    FirstSuccess,
    /// Wait for all, pick the highest-scoring success
    BestScore,
    /// Wait for all, pick the value most variations agree on
    Consensus,
    /// Wait for all, best score (or first success) plus every other success
    Combined,
}

impl CollapseStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstSuccess => "first_success",
            Self::BestScore => "best_score",
            Self::Consensus => "consensus",
            Self::Combined => "combined",
        }
    }

    /// Whether the strategy cannot run without a scoring function
    pub fn requires_scoring(self) -> bool {
        matches!(self, Self::BestScore)
    }
}

impl fmt::Display for CollapseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollapseStrategy {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first_success" => Ok(Self::FirstSuccess),
            "best_score" => Ok(Self::BestScore),
            "consensus" => Ok(Self::Consensus),
            "combined" => Ok(Self::Combined),
            other => Err(RouterError::configuration(format!(
                "unknown collapse strategy: {other}"
            ))),
        }
    }
}

/// Outcome of collapsing: the winner (if any) and everything else
#[derive(Debug)]
pub(crate) struct Collapsed<T> {
    pub winner: Option<VariationOutcome<T>>,
    pub alternatives: Vec<VariationOutcome<T>>,
    pub failure_reason: Option<String>,
}

/// Collapse outcomes given in completion order.
///
/// For FIRST_SUCCESS this picks the earliest success; the executor handles
/// the early return and only calls this once every variation has reported.
pub(crate) fn collapse<T: PartialEq>(
    strategy: CollapseStrategy,
    outcomes: Vec<VariationOutcome<T>>,
    scoring: Option<&ScoringFn<T>>,
    equivalence: Option<&EquivalenceFn<T>>,
) -> Collapsed<T> {
    let winner_idx = match strategy {
        CollapseStrategy::FirstSuccess => first_success(&outcomes),
        CollapseStrategy::BestScore => scoring.and_then(|f| best_score(&outcomes, f)),
        CollapseStrategy::Consensus => consensus(&outcomes, equivalence),
        CollapseStrategy::Combined => match scoring {
            Some(f) => best_score(&outcomes, f),
            None => first_success(&outcomes),
        },
    };

    let Some(winner_idx) = winner_idx else {
        let failure_reason = Some(failure_reason(&outcomes));
        return Collapsed {
            winner: None,
            alternatives: outcomes,
            failure_reason,
        };
    };

    let mut winner = None;
    let mut alternatives = Vec::with_capacity(outcomes.len().saturating_sub(1));
    for (idx, outcome) in outcomes.into_iter().enumerate() {
        if idx == winner_idx {
            winner = Some(outcome);
        } else if strategy != CollapseStrategy::Combined || outcome.success {
            alternatives.push(outcome);
        }
    }

    Collapsed {
        winner,
        alternatives,
        failure_reason: None,
    }
}

fn first_success<T>(outcomes: &[VariationOutcome<T>]) -> Option<usize> {
    outcomes.iter().position(|o| o.success)
}

/// Highest score wins; strict comparison keeps the earliest on ties. NaN scores rank last,
/// and a value whose scoring panics is not a candidate.
fn best_score<T>(outcomes: &[VariationOutcome<T>], scoring: &ScoringFn<T>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (idx, outcome) in outcomes.iter().enumerate() {
        let Some(value) = outcome.value.as_ref().filter(|_| outcome.success) else {
            continue;
        };
        let Ok(mut score) = panic::catch_unwind(AssertUnwindSafe(|| scoring(value))) else {
            warn!("Scoring function panicked on variation {}, skipping it", outcome.variation_id);
            continue;
        };
        if score.is_nan() {
            score = f64::NEG_INFINITY;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }

    best.map(|(idx, _)| idx)
}

/// Largest agreeing group wins; groups are formed in completion order, so
/// among equally large groups the one whose first member finished earliest
/// wins, and its first member is the reported winner. An equivalence check
/// that panics counts as disagreement.
fn consensus<T: PartialEq>(
    outcomes: &[VariationOutcome<T>],
    equivalence: Option<&EquivalenceFn<T>>,
) -> Option<usize> {
    // (first member index, group size)
    let mut groups: Vec<(usize, usize)> = Vec::new();

    for (idx, outcome) in outcomes.iter().enumerate() {
        let Some(value) = outcome.value.as_ref().filter(|_| outcome.success) else {
            continue;
        };

        let existing = groups.iter_mut().find(|(rep, _)| {
            outcomes[*rep]
                .value
                .as_ref()
                .is_some_and(|rep_value| match equivalence {
                    Some(eq) => panic::catch_unwind(AssertUnwindSafe(|| eq(rep_value, value)))
                        .unwrap_or_else(|_| {
                            warn!(
                                "Equivalence function panicked comparing {} with {}",
                                outcomes[*rep].variation_id, outcome.variation_id
                            );
                            false
                        }),
                    None => rep_value == value,
                })
        });

        match existing {
            Some((_, size)) => *size += 1,
            None => groups.push((idx, 1)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (rep, size) in groups {
        match best {
            Some((_, best_size)) if size <= best_size => {}
            _ => best = Some((rep, size)),
        }
    }

    best.map(|(rep, _)| rep)
}

/// Reason reported when nothing succeeded: the first real error in
/// completion order beats timeouts, which beat cancellations.
fn failure_reason<T>(outcomes: &[VariationOutcome<T>]) -> String {
    if let Some(error) = outcomes
        .iter()
        .filter(|o| !o.is_timeout() && !o.is_cancelled())
        .find_map(|o| o.error.clone())
    {
        return error;
    }
    if let Some(timeout) = outcomes.iter().find(|o| o.is_timeout()) {
        return timeout.error.clone().unwrap_or_default();
    }
    "no variation succeeded".to_string()
}
