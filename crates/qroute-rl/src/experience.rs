//! Experience replay buffer for RL

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::{Deserialize, Serialize};

use qroute_core::{Result, RouterError};

use crate::state::{Reward, RoutingState};

/// Default buffer capacity
pub const DEFAULT_CAPACITY: usize = 2000;

/// A single experience tuple (s, a, r, s', done)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub state: RoutingState,
    /// Catalog index of the action taken
    pub action: usize,
    pub reward: Reward,
    pub next_state: RoutingState,
    pub done: bool,
}

impl Experience {
    /// Create a new experience
    pub fn new(
        state: RoutingState,
        action: usize,
        reward: Reward,
        next_state: RoutingState,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }
}

/// Bounded FIFO replay buffer, safe to share between threads.
///
/// Eviction of the oldest entry and insertion of the new one happen under
/// the same lock, so readers never observe more than `capacity` entries.
#[derive(Debug)]
pub struct ExperienceBuffer {
    buffer: Mutex<VecDeque<Experience>>,
    capacity: usize,
}

impl ExperienceBuffer {
    /// Create a new experience buffer with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Experience>> {
        // No operation leaves the deque half-updated, so a poisoned lock is still usable
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an experience, evicting the oldest when full
    pub fn add(&self, experience: Experience) {
        let mut entries = self.entries();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(experience);
    }

    /// Sample `n` distinct entries uniformly at random; entries stay in the buffer
    pub fn sample_batch(&self, n: usize) -> Result<Vec<Experience>> {
        self.sample_batch_with(n, &mut rand::thread_rng())
    }

    /// [`sample_batch`](Self::sample_batch) with a caller-supplied RNG
    pub fn sample_batch_with<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<Experience>> {
        let entries = self.entries();
        if entries.is_empty() {
            return Err(RouterError::InsufficientData(
                "experience buffer is empty".to_string(),
            ));
        }
        if n > entries.len() {
            return Err(RouterError::InvalidArgument(format!(
                "requested {n} samples from a buffer of {}",
                entries.len()
            )));
        }

        Ok(rand::seq::index::sample(rng, entries.len(), n)
            .into_iter()
            .map(|i| entries[i].clone())
            .collect())
    }

    /// Get buffer length
    pub fn size(&self) -> usize {
        self.entries().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries().len() >= self.capacity
    }

    /// Fraction of capacity in use
    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity as f64
    }

    /// Clear the buffer
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Copy of all experiences, oldest first
    pub fn all(&self) -> Vec<Experience> {
        self.entries().iter().cloned().collect()
    }
}

impl Default for ExperienceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
