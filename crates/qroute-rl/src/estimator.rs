//! Value function estimator trait (Q-network / target-network pair)

use std::path::Path;

use serde::{Deserialize, Serialize};

use qroute_core::{Result, RouterError};

/// How the target network catches up with the live network
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Copy every weight exactly
    Hard,
    /// `target = tau * live + (1 - tau) * target`, `tau` in (0, 1]
    Soft(f64),
}

impl SyncMode {
    pub fn validate(self) -> Result<()> {
        match self {
            Self::Soft(tau) if !(tau > 0.0 && tau <= 1.0) => Err(RouterError::InvalidArgument(
                format!("soft sync tau must be in (0, 1], got {tau}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Shape summary of an estimator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorInfo {
    pub param_count: usize,
    pub layer_count: usize,
    pub architecture_name: String,
    pub state_size: usize,
    pub action_size: usize,
}

/// Maps a state vector to one value per action.
///
/// Implementations own a live network and a target network that start with
/// identical weights. Reads go through `&self`; training and syncing need
/// `&mut self`, so callers serialize writers.
pub trait ValueEstimator: Send + Sync {
    fn state_size(&self) -> usize;

    fn action_size(&self) -> usize;

    /// Live-network action values for one state
    fn predict(&self, state: &[f64]) -> Result<Vec<f64>>;

    /// Live-network action values for a batch of states
    fn predict_batch(&self, states: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        states.iter().map(|s| self.predict(s)).collect()
    }

    /// Target-network action values for one state
    fn predict_target(&self, state: &[f64]) -> Result<Vec<f64>>;

    fn predict_target_batch(&self, states: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        states.iter().map(|s| self.predict_target(s)).collect()
    }

    /// One gradient step of the live network toward `targets`; returns the loss
    fn train_step(&mut self, states: &[Vec<f64>], targets: &[Vec<f64>]) -> Result<f64>;

    fn sync_target(&mut self, mode: SyncMode) -> Result<()>;

    /// Persist weights; the format is implementation-defined
    fn save(&self, path: &Path) -> Result<()>;

    /// Restore weights. `false` when nothing is stored at `path` or it could
    /// not be read, in which case the current weights are kept.
    fn load(&mut self, path: &Path) -> bool;

    fn info(&self) -> EstimatorInfo;
}

/// Index of the largest value; NaN never wins, ties go to the lowest index
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Largest non-NaN value, 0.0 for an empty or all-NaN slice
pub fn max_value(values: &[f64]) -> f64 {
    argmax(values).map_or(0.0, |i| values[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_validation() {
        assert!(SyncMode::Hard.validate().is_ok());
        assert!(SyncMode::Soft(0.01).validate().is_ok());
        assert!(SyncMode::Soft(1.0).validate().is_ok());
        assert!(SyncMode::Soft(0.0).validate().is_err());
        assert!(SyncMode::Soft(1.5).validate().is_err());
        assert!(SyncMode::Soft(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.3]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[f64::NAN, -1.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_max_value() {
        assert_eq!(max_value(&[-2.0, -1.0]), -1.0);
        assert_eq!(max_value(&[]), 0.0);
    }
}
