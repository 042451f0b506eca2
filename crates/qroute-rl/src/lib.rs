//! qroute RL - Learned routing agent
//!
//! Encodes routing contexts into fixed-size state vectors, picks a
//! provider/model/strategy from a versioned action catalog with an
//! epsilon-greedy DQN, and learns from shaped rewards through experience
//! replay and a periodically synced target network.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::float_cmp)]
#![allow(clippy::similar_names)]

pub mod action;
pub mod agent;
pub mod estimator;
pub mod experience;
pub mod network;
pub mod reward;
pub mod state;

pub use action::{ActionCatalog, RoutingAction, RoutingStrategy};
pub use agent::{PerformanceMetrics, RoutingAgent, RoutingStats, TrainingRecord};
pub use estimator::{EstimatorInfo, SyncMode, ValueEstimator};
pub use experience::{Experience, ExperienceBuffer};
pub use network::MlpEstimator;
pub use reward::{calculate_reward, OutcomeMetrics, RoutingOutcome};
pub use state::{
    encode_state, ContextType, ResourceWeights, Reward, RoutingContext, RoutingState, STATE_SIZE,
};
