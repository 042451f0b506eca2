//! Routing agent - epsilon-greedy DQN over the action catalog
//!
//! The agent is shared by reference between request handlers: `act` and
//! `remember` take `&self` and only hold short-lived locks, while `replay`
//! calls are serialized by an internal mutex.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use qroute_core::{AgentConfig, Config, Result, RewardConfig, RouterError, TargetSyncConfig};

use crate::action::{ActionCatalog, RoutingAction};
use crate::estimator::{argmax, max_value, EstimatorInfo, SyncMode, ValueEstimator};
use crate::experience::{Experience, ExperienceBuffer};
use crate::network::MlpEstimator;
use crate::reward::{calculate_reward, OutcomeMetrics, RoutingOutcome};
use crate::state::{encode_state, Reward, RoutingContext, RoutingState, STATE_SIZE};

/// Weight of the previous value in the routing performance average
const PERFORMANCE_RETENTION: f64 = 0.8;

/// Training records written by `save_model`
const PERSISTED_HISTORY: usize = 100;

const SNAPSHOT_FORMAT: u32 = 1;

type SharedEstimator = Option<Box<dyn ValueEstimator>>;

/// One replay step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub step: u64,
    pub loss: f64,
    pub exploration_rate: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LearningState {
    exploration_rate: f64,
    training_steps: u64,
    routing_performance: HashMap<String, f64>,
    decisions: u64,
    transitions: u64,
    total_reward: f64,
    last_loss: Option<f64>,
    history: VecDeque<TrainingRecord>,
}

impl LearningState {
    fn new(exploration_rate: f64) -> Self {
        Self {
            exploration_rate,
            training_steps: 0,
            routing_performance: HashMap::new(),
            decisions: 0,
            transitions: 0,
            total_reward: 0.0,
            last_loss: None,
            history: VecDeque::new(),
        }
    }
}

/// Agent state written by `save_model`
#[derive(Debug, Serialize, Deserialize)]
struct AgentSnapshot {
    format: u32,
    catalog_version: u32,
    exploration_rate: f64,
    training_steps: u64,
    routing_performance: BTreeMap<String, f64>,
    decisions: u64,
    transitions: u64,
    total_reward: f64,
    training_history: Vec<TrainingRecord>,
    saved_at: DateTime<Utc>,
}

/// Snapshot returned by [`RoutingAgent::get_performance_metrics`]
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub exploration_rate: f64,
    pub training_steps: u64,
    pub memory_size: usize,
    pub memory_utilization: f64,
    pub routing_performance: BTreeMap<String, f64>,
    pub action_space_size: usize,
    pub state_space_size: usize,
    pub estimator: Option<EstimatorInfo>,
}

/// Snapshot returned by [`RoutingAgent::get_routing_stats`]
#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    /// `provider:model` keys, best first
    pub ranked_routes: Vec<(String, f64)>,
    pub best_route: Option<String>,
    pub decisions: u64,
    pub transitions: u64,
    pub total_reward: f64,
    pub average_reward: f64,
    pub last_loss: Option<f64>,
    pub catalog_version: u32,
}

/// Learned routing agent
pub struct RoutingAgent {
    config: AgentConfig,
    reward_config: RewardConfig,
    catalog: ActionCatalog,
    buffer: ExperienceBuffer,
    estimator: RwLock<SharedEstimator>,
    state: Mutex<LearningState>,
    rng: Mutex<StdRng>,
    replay_lock: Mutex<()>,
}

impl RoutingAgent {
    /// Create an agent without an estimator; it acts uniformly at random
    /// and `replay` is a no-op until one is attached.
    pub fn new(config: AgentConfig, reward_config: RewardConfig, catalog: ActionCatalog) -> Result<Self> {
        config.validate()?;
        if catalog.is_empty() {
            return Err(RouterError::configuration("action catalog must not be empty"));
        }

        let rng = match config.seed {
            // Decorrelate action sampling from weight initialisation
            Some(seed) => StdRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15),
            None => StdRng::from_entropy(),
        };

        info!(
            "Creating routing agent: {} actions, state size {}, memory {}",
            catalog.len(),
            STATE_SIZE,
            config.memory_size
        );

        Ok(Self {
            buffer: ExperienceBuffer::new(config.memory_size),
            state: Mutex::new(LearningState::new(config.exploration_rate)),
            rng: Mutex::new(rng),
            estimator: RwLock::new(None),
            replay_lock: Mutex::new(()),
            config,
            reward_config,
            catalog,
        })
    }

    /// Create an agent backed by an [`MlpEstimator`] of the configured architecture
    pub fn with_default_estimator(
        config: AgentConfig,
        reward_config: RewardConfig,
        catalog: ActionCatalog,
    ) -> Result<Self> {
        let estimator = MlpEstimator::new(
            STATE_SIZE,
            catalog.len(),
            config.architecture,
            config.learning_rate,
            config.seed,
        )?;
        Self::new(config, reward_config, catalog)?.with_estimator(Box::new(estimator))
    }

    /// Agent with the default catalog and estimator, configured from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_default_estimator(
            config.agent.clone(),
            config.reward.clone(),
            ActionCatalog::default(),
        )
    }

    pub fn with_estimator(self, estimator: Box<dyn ValueEstimator>) -> Result<Self> {
        self.set_estimator(estimator)?;
        Ok(self)
    }

    /// Attach or replace the estimator; its dimensions must match the catalog
    pub fn set_estimator(&self, estimator: Box<dyn ValueEstimator>) -> Result<()> {
        if estimator.state_size() != STATE_SIZE || estimator.action_size() != self.catalog.len() {
            return Err(RouterError::configuration(format!(
                "estimator is {}x{}, agent needs {}x{}",
                estimator.state_size(),
                estimator.action_size(),
                STATE_SIZE,
                self.catalog.len()
            )));
        }

        let info = estimator.info();
        *self.estimator_write() = Some(estimator);
        info!(
            "Attached {} estimator ({} parameters)",
            info.architecture_name, info.param_count
        );
        Ok(())
    }

    pub fn has_estimator(&self) -> bool {
        self.estimator_read().is_some()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn exploration_rate(&self) -> f64 {
        self.learning().exploration_rate
    }

    pub fn training_steps(&self) -> u64 {
        self.learning().training_steps
    }

    pub fn memory_size(&self) -> usize {
        self.buffer.size()
    }

    pub fn encode_state(&self, context: &RoutingContext) -> RoutingState {
        encode_state(context, &self.catalog)
    }

    /// Epsilon-greedy action for `state`
    pub fn act(&self, state: &RoutingState) -> RoutingAction {
        let epsilon = {
            let mut learning = self.learning();
            learning.decisions += 1;
            learning.exploration_rate
        };
        let explore = self.rng().gen::<f64>() < epsilon;

        if !explore {
            if let Some(action) = self.greedy(state) {
                return action;
            }
        }

        self.random_action()
    }

    /// Encode `context` and act on it; the state is returned for `remember`
    pub fn act_on_context(&self, context: &RoutingContext) -> (RoutingState, RoutingAction) {
        let state = self.encode_state(context);
        let action = self.act(&state);
        (state, action)
    }

    /// Highest-valued action without exploration, `None` without an estimator
    pub fn best_action(&self, state: &RoutingState) -> Option<RoutingAction> {
        self.greedy(state)
    }

    fn greedy(&self, state: &RoutingState) -> Option<RoutingAction> {
        let estimator = self.estimator_read();
        let estimator = estimator.as_ref()?;
        match estimator.predict(state.as_slice()) {
            Ok(values) => argmax(&values).map(|i| self.catalog.decode(i).clone()),
            Err(e) => {
                warn!("Prediction failed, falling back to a random action: {}", e);
                None
            }
        }
    }

    fn random_action(&self) -> RoutingAction {
        let index = self.rng().gen_range(0..self.catalog.len());
        self.catalog.decode(index).clone()
    }

    /// Store a transition. Actions outside the catalog are logged and skipped;
    /// returns whether the transition was recorded.
    pub fn remember(
        &self,
        state: RoutingState,
        action: &RoutingAction,
        reward: Reward,
        next_state: RoutingState,
        done: bool,
    ) -> bool {
        let Some(index) = self.catalog.encode(action) else {
            warn!("Ignoring transition for action outside the catalog: {}", action);
            return false;
        };

        self.buffer
            .add(Experience::new(state, index, reward, next_state, done));

        let mut learning = self.learning();
        learning.transitions += 1;
        learning.total_reward += reward;
        true
    }

    pub fn calculate_reward(
        &self,
        action: &RoutingAction,
        outcome: &RoutingOutcome,
        metrics: &OutcomeMetrics,
    ) -> Reward {
        calculate_reward(&self.reward_config, action, outcome, metrics)
    }

    /// One training step on a sampled batch.
    ///
    /// Returns `None` without touching any state when the buffer holds fewer
    /// than `batch_size` transitions or no estimator is attached.
    pub fn replay(&self) -> Option<f64> {
        let _serial = self.replay_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let batch_size = self.config.batch_size;
        if self.buffer.size() < batch_size {
            return None;
        }

        let mut guard = self.estimator_write();
        let estimator = guard.as_mut()?;

        let batch = {
            let mut rng = self.rng();
            match self.buffer.sample_batch_with(batch_size, &mut *rng) {
                Ok(batch) => batch,
                Err(e) => {
                    debug!("Skipping replay: {}", e);
                    return None;
                }
            }
        };

        let loss = match self.train_on(&mut **estimator, &batch) {
            Ok(loss) => loss,
            Err(e) => {
                warn!("Replay step failed: {}", e);
                return None;
            }
        };

        let (step, epsilon) = {
            let mut learning = self.learning();
            learning.training_steps += 1;
            if learning.exploration_rate > self.config.exploration_min {
                learning.exploration_rate = (learning.exploration_rate
                    * self.config.exploration_decay)
                    .max(self.config.exploration_min);
            }
            learning.last_loss = Some(loss);

            let record = TrainingRecord {
                step: learning.training_steps,
                loss,
                exploration_rate: learning.exploration_rate,
                timestamp: Utc::now(),
            };
            learning.history.push_back(record);
            while learning.history.len() > self.config.history_limit {
                learning.history.pop_front();
            }

            (learning.training_steps, learning.exploration_rate)
        };

        let sync = match self.config.target_sync {
            TargetSyncConfig::Hard { every } if step % every.max(1) == 0 => Some(SyncMode::Hard),
            TargetSyncConfig::Hard { .. } => None,
            TargetSyncConfig::Soft { tau } => Some(SyncMode::Soft(tau)),
        };
        if let Some(mode) = sync {
            if let Err(e) = estimator.sync_target(mode) {
                warn!("Target network sync failed: {}", e);
            } else if mode == SyncMode::Hard {
                debug!("Target network synced at step {}", step);
            }
        }

        debug!("Replay step {}: loss {:.6}, epsilon {:.4}", step, loss, epsilon);
        Some(loss)
    }

    fn train_on(&self, estimator: &mut dyn ValueEstimator, batch: &[Experience]) -> Result<f64> {
        let states: Vec<Vec<f64>> = batch.iter().map(|e| e.state.as_slice().to_vec()).collect();

        // Terminal transitions never look at their next state
        let open: Vec<usize> = (0..batch.len()).filter(|&i| !batch[i].done).collect();
        let next_states: Vec<Vec<f64>> = open
            .iter()
            .map(|&i| batch[i].next_state.as_slice().to_vec())
            .collect();
        let next_values = estimator.predict_target_batch(&next_states)?;
        let mut bootstrap = vec![0.0; batch.len()];
        for (&i, values) in open.iter().zip(&next_values) {
            bootstrap[i] = max_value(values);
        }

        let mut targets = estimator.predict_batch(&states)?;
        for ((target, experience), future) in targets.iter_mut().zip(batch).zip(&bootstrap) {
            let value = if experience.done {
                experience.reward
            } else {
                experience.reward + self.config.gamma * future
            };
            if let Some(slot) = target.get_mut(experience.action) {
                *slot = value;
            }
        }

        estimator.train_step(&states, &targets)
    }

    /// Blend `score` into the running performance of the action's
    /// `provider:model` key; the first observation initialises it.
    pub fn update_routing_performance(&self, action: &RoutingAction, score: f64) {
        if score.is_nan() {
            warn!("Ignoring NaN performance score for {}", action);
            return;
        }
        let score = score.clamp(0.0, 1.0);

        self.learning()
            .routing_performance
            .entry(action.key())
            .and_modify(|current| {
                *current = PERFORMANCE_RETENTION * *current + (1.0 - PERFORMANCE_RETENTION) * score;
            })
            .or_insert(score);
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let (exploration_rate, training_steps, routing_performance) = {
            let learning = self.learning();
            (
                learning.exploration_rate,
                learning.training_steps,
                learning
                    .routing_performance
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect(),
            )
        };

        PerformanceMetrics {
            exploration_rate,
            training_steps,
            memory_size: self.buffer.size(),
            memory_utilization: self.buffer.utilization(),
            routing_performance,
            action_space_size: self.catalog.len(),
            state_space_size: STATE_SIZE,
            estimator: self.estimator_read().as_ref().map(|e| e.info()),
        }
    }

    pub fn get_routing_stats(&self) -> RoutingStats {
        let learning = self.learning();

        let mut ranked_routes: Vec<(String, f64)> = learning
            .routing_performance
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        ranked_routes.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        RoutingStats {
            best_route: ranked_routes.first().map(|(k, _)| k.clone()),
            ranked_routes,
            decisions: learning.decisions,
            transitions: learning.transitions,
            total_reward: learning.total_reward,
            average_reward: if learning.transitions > 0 {
                learning.total_reward / learning.transitions as f64
            } else {
                0.0
            },
            last_loss: learning.last_loss,
            catalog_version: self.catalog.version(),
        }
    }

    /// Training records, oldest first
    pub fn training_history(&self) -> Vec<TrainingRecord> {
        self.learning().history.iter().cloned().collect()
    }

    /// Drop every stored transition
    pub fn clear_memory(&self) {
        self.buffer.clear();
        debug!("Experience buffer cleared");
    }

    /// Write the agent state to `path` and, with an estimator attached, its
    /// weights to `<path>.weights`.
    pub fn save_model(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let learning = self.learning();
            let skip = learning.history.len().saturating_sub(PERSISTED_HISTORY);
            AgentSnapshot {
                format: SNAPSHOT_FORMAT,
                catalog_version: self.catalog.version(),
                exploration_rate: learning.exploration_rate,
                training_steps: learning.training_steps,
                routing_performance: learning
                    .routing_performance
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect(),
                decisions: learning.decisions,
                transitions: learning.transitions,
                total_reward: learning.total_reward,
                training_history: learning.history.iter().skip(skip).cloned().collect(),
                saved_at: Utc::now(),
            }
        };

        write_snapshot(path, &snapshot).map_err(|e| RouterError::Persistence(format!("{e:#}")))?;

        if let Some(estimator) = self.estimator_read().as_ref() {
            estimator.save(&weights_path(path))?;
        }

        info!(
            "Saved routing agent to {} (step {}, epsilon {:.4})",
            path.display(),
            snapshot.training_steps,
            snapshot.exploration_rate
        );
        Ok(())
    }

    /// Restore a model written by [`save_model`](Self::save_model).
    ///
    /// Returns `false` and keeps the current state when nothing is stored at
    /// `path`, the files cannot be read, or they belong to another catalog.
    pub fn load_model(&self, path: &Path) -> bool {
        if !path.exists() {
            info!("No saved routing agent at {}", path.display());
            return false;
        }

        let snapshot = match read_snapshot(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to load routing agent from {}: {:#}", path.display(), e);
                return false;
            }
        };

        if snapshot.catalog_version != self.catalog.version() {
            warn!(
                "Saved agent uses catalog version {}, current is {}",
                snapshot.catalog_version,
                self.catalog.version()
            );
            return false;
        }

        let weights = weights_path(path);
        if weights.exists() {
            if let Some(estimator) = self.estimator_write().as_mut() {
                if !estimator.load(&weights) {
                    return false;
                }
            }
        }

        let mut learning = self.learning();
        learning.exploration_rate = snapshot
            .exploration_rate
            .clamp(self.config.exploration_min, 1.0);
        learning.training_steps = snapshot.training_steps;
        learning.routing_performance = snapshot.routing_performance.into_iter().collect();
        learning.decisions = snapshot.decisions;
        learning.transitions = snapshot.transitions;
        learning.total_reward = snapshot.total_reward;
        learning.last_loss = snapshot.training_history.last().map(|r| r.loss);
        learning.history = snapshot.training_history.into_iter().collect();
        while learning.history.len() > self.config.history_limit {
            learning.history.pop_front();
        }

        info!(
            "Loaded routing agent from {} (step {}, epsilon {:.4})",
            path.display(),
            learning.training_steps,
            learning.exploration_rate
        );
        true
    }

    fn learning(&self) -> MutexGuard<'_, LearningState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn estimator_read(&self) -> RwLockReadGuard<'_, SharedEstimator> {
        self.estimator.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn estimator_write(&self) -> RwLockWriteGuard<'_, SharedEstimator> {
        self.estimator.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where estimator weights live next to an agent snapshot
pub fn weights_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".weights");
    PathBuf::from(os)
}

fn write_snapshot(path: &Path, snapshot: &AgentSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize agent state")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_snapshot(path: &Path) -> anyhow::Result<AgentSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: AgentSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse agent state in {}", path.display()))?;
    anyhow::ensure!(
        snapshot.format == SNAPSHOT_FORMAT,
        "unsupported agent snapshot format {}",
        snapshot.format
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RoutingStrategy;
    use crate::state::ContextType;
    use qroute_core::config::NetworkArchitecture;

    fn test_config() -> AgentConfig {
        AgentConfig {
            batch_size: 4,
            memory_size: 100,
            architecture: NetworkArchitecture::Lightweight,
            seed: Some(17),
            ..AgentConfig::default()
        }
    }

    fn create_test_agent(config: AgentConfig) -> RoutingAgent {
        RoutingAgent::with_default_estimator(config, RewardConfig::default(), ActionCatalog::default())
            .unwrap()
    }

    fn test_state(agent: &RoutingAgent, complexity: f64) -> RoutingState {
        agent.encode_state(
            &RoutingContext::new(ContextType::CodeGeneration)
                .with_complexity(complexity)
                .with_all_providers(agent.catalog()),
        )
    }

    fn fill(agent: &RoutingAgent, n: usize) {
        for i in 0..n {
            let state = test_state(agent, i as f64 / n as f64);
            let action = agent.catalog().decode(i % agent.catalog().len()).clone();
            agent.remember(state.clone(), &action, 0.5, state, i % 5 == 0);
        }
    }

    #[test]
    fn test_without_estimator_acts_randomly() {
        let agent = RoutingAgent::new(test_config(), RewardConfig::default(), ActionCatalog::default())
            .unwrap();
        assert!(!agent.has_estimator());

        let state = test_state(&agent, 0.5);
        for _ in 0..20 {
            let action = agent.act(&state);
            assert!(agent.catalog().encode(&action).is_some());
        }
        assert!(agent.best_action(&state).is_none());

        fill(&agent, 10);
        assert!(agent.replay().is_none());
        assert_eq!(agent.training_steps(), 0);
    }

    #[test]
    fn test_greedy_when_not_exploring() {
        let agent = create_test_agent(AgentConfig {
            exploration_rate: 0.0,
            exploration_min: 0.0,
            ..test_config()
        });
        let state = test_state(&agent, 0.3);
        let best = agent.best_action(&state).unwrap();
        for _ in 0..10 {
            assert_eq!(agent.act(&state), best);
        }
    }

    #[test]
    fn test_rejects_mismatched_estimator() {
        let agent = RoutingAgent::new(test_config(), RewardConfig::default(), ActionCatalog::default())
            .unwrap();
        let wrong = MlpEstimator::new(STATE_SIZE, 3, NetworkArchitecture::Lightweight, 0.01, Some(1))
            .unwrap();
        assert!(matches!(
            agent.set_estimator(Box::new(wrong)),
            Err(RouterError::Configuration(_))
        ));
        assert!(!agent.has_estimator());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AgentConfig {
            gamma: 1.5,
            ..test_config()
        };
        assert!(RoutingAgent::new(config, RewardConfig::default(), ActionCatalog::default()).is_err());
    }

    #[test]
    fn test_remember_unknown_action_skipped() {
        let agent = create_test_agent(test_config());
        let state = test_state(&agent, 0.5);
        let unknown = RoutingAction::new("nowhere", "none", RoutingStrategy::Economy);

        assert!(!agent.remember(state.clone(), &unknown, 1.0, state, true));
        assert_eq!(agent.memory_size(), 0);
        assert_eq!(agent.get_routing_stats().transitions, 0);
    }

    #[test]
    fn test_replay_below_batch_size() {
        let agent = create_test_agent(test_config());
        fill(&agent, 3);
        assert!(agent.replay().is_none());
        assert_eq!(agent.training_steps(), 0);
        assert_eq!(agent.exploration_rate(), 1.0);
    }

    #[test]
    fn test_replay_trains_and_decays() {
        let agent = create_test_agent(test_config());
        fill(&agent, 10);

        let loss = agent.replay().unwrap();
        assert!(loss.is_finite());
        assert_eq!(agent.training_steps(), 1);
        assert!((agent.exploration_rate() - 0.995).abs() < 1e-12);
        assert_eq!(agent.get_routing_stats().last_loss, Some(loss));
    }

    #[test]
    fn test_exploration_bounded_by_minimum() {
        let agent = create_test_agent(AgentConfig {
            exploration_decay: 0.5,
            exploration_min: 0.1,
            ..test_config()
        });
        fill(&agent, 10);

        for _ in 0..10 {
            agent.replay().unwrap();
            assert!(agent.exploration_rate() >= 0.1);
        }
        assert_eq!(agent.exploration_rate(), 0.1);
    }

    #[test]
    fn test_hard_sync_every_k_steps() {
        let agent = create_test_agent(AgentConfig {
            target_sync: TargetSyncConfig::Hard { every: 3 },
            ..test_config()
        });
        fill(&agent, 10);
        let state = test_state(&agent, 0.7);

        let synced = |agent: &RoutingAgent| {
            let guard = agent.estimator_read();
            let estimator = guard.as_ref().unwrap();
            estimator.predict(state.as_slice()).unwrap()
                == estimator.predict_target(state.as_slice()).unwrap()
        };

        agent.replay().unwrap();
        assert!(!synced(&agent));
        agent.replay().unwrap();
        agent.replay().unwrap();
        assert!(synced(&agent));
    }

    #[test]
    fn test_full_soft_sync_tracks_live_each_replay() {
        let agent = create_test_agent(AgentConfig {
            target_sync: TargetSyncConfig::Soft { tau: 1.0 },
            ..test_config()
        });
        fill(&agent, 10);
        let state = test_state(&agent, 0.7);

        for _ in 0..3 {
            agent.replay().unwrap();
            let guard = agent.estimator_read();
            let estimator = guard.as_ref().unwrap();
            assert_eq!(
                estimator.predict(state.as_slice()).unwrap(),
                estimator.predict_target(state.as_slice()).unwrap()
            );
        }
    }

    #[test]
    fn test_partial_soft_sync_moves_target_every_replay() {
        let agent = create_test_agent(AgentConfig {
            target_sync: TargetSyncConfig::Soft { tau: 0.5 },
            ..test_config()
        });
        fill(&agent, 10);
        let state = test_state(&agent, 0.7);

        let target = |agent: &RoutingAgent| {
            let guard = agent.estimator_read();
            guard.as_ref().unwrap().predict_target(state.as_slice()).unwrap()
        };

        let mut previous = target(&agent);
        for _ in 0..3 {
            agent.replay().unwrap();
            let current = target(&agent);
            assert_ne!(current, previous);
            previous = current;
        }
        assert_eq!(agent.training_steps(), 3);
    }

    #[test]
    fn test_training_history_bounded() {
        let agent = create_test_agent(AgentConfig {
            history_limit: 3,
            ..test_config()
        });
        fill(&agent, 10);
        for _ in 0..5 {
            agent.replay().unwrap();
        }

        let history = agent.training_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].step, 3);
        assert_eq!(history[2].step, 5);
    }

    #[test]
    fn test_routing_performance_average() {
        let agent = create_test_agent(test_config());
        let gpt = RoutingAction::new("openai", "gpt-4o", RoutingStrategy::Balanced);
        let haiku = RoutingAction::new("anthropic", "claude-3-haiku", RoutingStrategy::Economy);

        agent.update_routing_performance(&gpt, 0.5);
        agent.update_routing_performance(&gpt, 1.0);
        agent.update_routing_performance(&haiku, 0.9);
        agent.update_routing_performance(&haiku, f64::NAN);

        let metrics = agent.get_performance_metrics();
        assert!((metrics.routing_performance["openai:gpt-4o"] - 0.6).abs() < 1e-12);
        assert_eq!(metrics.routing_performance["anthropic:claude-3-haiku"], 0.9);
        assert_eq!(metrics.action_space_size, 12);
        assert_eq!(metrics.state_space_size, STATE_SIZE);

        let stats = agent.get_routing_stats();
        assert_eq!(stats.best_route.as_deref(), Some("anthropic:claude-3-haiku"));
        assert_eq!(stats.ranked_routes[1].0, "openai:gpt-4o");
    }

    #[test]
    fn test_reward_tracking() {
        let agent = create_test_agent(test_config());
        let state = test_state(&agent, 0.5);
        let action = agent.catalog().decode(0).clone();
        agent.remember(state.clone(), &action, 1.0, state.clone(), false);
        agent.remember(state.clone(), &action, -0.5, state, true);

        let stats = agent.get_routing_stats();
        assert_eq!(stats.transitions, 2);
        assert!((stats.total_reward - 0.5).abs() < 1e-12);
        assert!((stats.average_reward - 0.25).abs() < 1e-12);
        assert_eq!(stats.catalog_version, 1);
    }

    #[test]
    fn test_clear_memory() {
        let agent = create_test_agent(test_config());
        fill(&agent, 5);
        assert_eq!(agent.memory_size(), 5);
        agent.clear_memory();
        assert_eq!(agent.memory_size(), 0);
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");

        let agent = create_test_agent(test_config());
        fill(&agent, 10);
        for _ in 0..3 {
            agent.replay().unwrap();
        }
        agent.update_routing_performance(agent.catalog().decode(2), 0.8);
        agent.save_model(&path).unwrap();
        assert!(weights_path(&path).exists());

        let restored = create_test_agent(AgentConfig {
            seed: Some(99),
            ..test_config()
        });
        assert!(restored.load_model(&path));
        assert_eq!(restored.training_steps(), 3);
        assert_eq!(restored.exploration_rate(), agent.exploration_rate());
        assert_eq!(restored.training_history().len(), 3);

        let state = test_state(&agent, 0.4);
        assert_eq!(restored.best_action(&state), agent.best_action(&state));
        assert_eq!(
            restored.get_performance_metrics().routing_performance,
            agent.get_performance_metrics().routing_performance
        );
    }

    #[test]
    fn test_load_model_missing_or_foreign_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let agent = create_test_agent(test_config());
        assert!(!agent.load_model(&dir.path().join("missing.json")));

        let path = dir.path().join("agent.json");
        agent.save_model(&path).unwrap();

        let catalog = ActionCatalog::new(
            2,
            vec![RoutingAction::new("local", "phi-3", RoutingStrategy::Economy)],
        )
        .unwrap();
        let other = RoutingAgent::new(test_config(), RewardConfig::default(), catalog).unwrap();
        assert!(!other.load_model(&path));
    }
}
