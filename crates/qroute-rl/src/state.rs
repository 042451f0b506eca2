//! Routing context and its fixed-size state vector encoding

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::ActionCatalog;

/// Reward value from environment
pub type Reward = f64;

/// Number of context-type one-hot slots
pub const CONTEXT_TYPE_COUNT: usize = 10;

/// Number of provider availability slots
pub const PROVIDER_SLOTS: usize = 5;

/// complexity + context one-hot + providers + historical performance + 3 weights + preference
pub const STATE_SIZE: usize = 1 + CONTEXT_TYPE_COUNT + PROVIDER_SLOTS + 1 + 3 + 1;

/// Kind of work the request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    CodeGeneration,
    CodeReview,
    Debugging,
    Documentation,
    Analysis,
    CreativeWriting,
    Translation,
    Summarization,
    QuestionAnswering,
    #[default]
    General,
}

impl ContextType {
    pub const ALL: [ContextType; CONTEXT_TYPE_COUNT] = [
        Self::CodeGeneration,
        Self::CodeReview,
        Self::Debugging,
        Self::Documentation,
        Self::Analysis,
        Self::CreativeWriting,
        Self::Translation,
        Self::Summarization,
        Self::QuestionAnswering,
        Self::General,
    ];

    /// Position in the one-hot block
    pub fn index(self) -> usize {
        match self {
            Self::CodeGeneration => 0,
            Self::CodeReview => 1,
            Self::Debugging => 2,
            Self::Documentation => 3,
            Self::Analysis => 4,
            Self::CreativeWriting => 5,
            Self::Translation => 6,
            Self::Summarization => 7,
            Self::QuestionAnswering => 8,
            Self::General => 9,
        }
    }
}

/// Relative importance of cost, time and quality for a request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceWeights {
    pub cost: f64,
    pub time: f64,
    pub quality: f64,
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self {
            cost: 0.33,
            time: 0.33,
            quality: 0.34,
        }
    }
}

/// Everything the agent looks at when making one routing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Task complexity estimate (0-1)
    pub task_complexity: f64,

    pub context_type: ContextType,

    /// Provider name to availability; providers not listed count as unavailable
    pub provider_availability: HashMap<String, bool>,

    /// Aggregate historical success/quality (0-1)
    pub historical_performance: f64,

    pub resource_weights: ResourceWeights,

    /// How strongly the user pinned a preference (0-1)
    pub user_preference_strength: f64,
}

impl RoutingContext {
    pub fn new(context_type: ContextType) -> Self {
        Self {
            task_complexity: 0.5,
            context_type,
            provider_availability: HashMap::new(),
            historical_performance: 0.5,
            resource_weights: ResourceWeights::default(),
            user_preference_strength: 0.0,
        }
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.task_complexity = complexity;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>, available: bool) -> Self {
        self.provider_availability.insert(provider.into(), available);
        self
    }

    /// Mark every provider of the catalog available
    pub fn with_all_providers(mut self, catalog: &ActionCatalog) -> Self {
        for provider in catalog.providers() {
            self.provider_availability.insert(provider.to_string(), true);
        }
        self
    }

    pub fn with_historical_performance(mut self, performance: f64) -> Self {
        self.historical_performance = performance;
        self
    }

    pub fn with_resource_weights(mut self, weights: ResourceWeights) -> Self {
        self.resource_weights = weights;
        self
    }

    pub fn with_user_preference(mut self, strength: f64) -> Self {
        self.user_preference_strength = strength;
        self
    }
}

/// Fixed-length numeric state vector of [`STATE_SIZE`] components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingState(Vec<f64>);

impl RoutingState {
    /// Wrap raw features, e.g. replayed from storage. No length check here;
    /// the estimator rejects vectors of the wrong size.
    pub fn from_features(features: Vec<f64>) -> Self {
        Self(features)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    /// All-zero state, useful as a terminal next-state placeholder
    pub fn zeros() -> Self {
        Self(vec![0.0; STATE_SIZE])
    }
}

impl AsRef<[f64]> for RoutingState {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Encode a context into a state vector.
///
/// Layout: `[complexity, context one-hot(10), provider availability(5),
/// historical performance, cost, time, quality, user preference]`.
/// Provider slots follow `catalog.providers()`; unused slots stay 0.
pub fn encode_state(context: &RoutingContext, catalog: &ActionCatalog) -> RoutingState {
    let mut features = Vec::with_capacity(STATE_SIZE);

    features.push(unit(context.task_complexity));

    let mut one_hot = [0.0; CONTEXT_TYPE_COUNT];
    one_hot[context.context_type.index()] = 1.0;
    features.extend_from_slice(&one_hot);

    let providers = catalog.providers();
    for slot in 0..PROVIDER_SLOTS {
        let available = providers
            .get(slot)
            .and_then(|p| context.provider_availability.get(*p))
            .copied()
            .unwrap_or(false);
        features.push(if available { 1.0 } else { 0.0 });
    }

    features.push(unit(context.historical_performance));

    let weights = context.resource_weights;
    features.push(unit(weights.cost));
    features.push(unit(weights.time));
    features.push(unit(weights.quality));

    features.push(unit(context.user_preference_strength));

    RoutingState(features)
}

/// Clamp into [0, 1]; NaN maps to 0
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_context() -> RoutingContext {
        RoutingContext::new(ContextType::Debugging)
            .with_complexity(0.8)
            .with_provider("openai", true)
            .with_provider("google", true)
            .with_provider("local", false)
            .with_historical_performance(0.65)
            .with_resource_weights(ResourceWeights {
                cost: 0.2,
                time: 0.3,
                quality: 0.5,
            })
            .with_user_preference(0.1)
    }

    #[test]
    fn test_state_size() {
        assert_eq!(STATE_SIZE, 21);
        let state = encode_state(&create_test_context(), &ActionCatalog::default());
        assert_eq!(state.len(), STATE_SIZE);
    }

    #[test]
    fn test_state_layout() {
        let state = encode_state(&create_test_context(), &ActionCatalog::default());
        let v = state.as_slice();

        assert_eq!(v[0], 0.8);
        // Debugging is one-hot slot 2
        assert_eq!(&v[1..11], &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        // openai, anthropic, google, xai, local
        assert_eq!(&v[11..16], &[1.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(v[16], 0.65);
        assert_eq!(&v[17..20], &[0.2, 0.3, 0.5]);
        assert_eq!(v[20], 0.1);
    }

    #[test]
    fn test_encoding_is_pure() {
        let context = create_test_context();
        let catalog = ActionCatalog::default();
        assert_eq!(encode_state(&context, &catalog), encode_state(&context, &catalog));
    }

    #[test]
    fn test_out_of_range_inputs_clamped() {
        let context = RoutingContext::new(ContextType::General)
            .with_complexity(3.0)
            .with_historical_performance(f64::NAN)
            .with_user_preference(-1.0);
        let state = encode_state(&context, &ActionCatalog::default());
        let v = state.as_slice();

        assert_eq!(v[0], 1.0);
        assert_eq!(v[16], 0.0);
        assert_eq!(v[20], 0.0);
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn test_context_type_indices_unique() {
        let mut seen = [false; CONTEXT_TYPE_COUNT];
        for ct in ContextType::ALL {
            assert!(!seen[ct.index()]);
            seen[ct.index()] = true;
        }
    }

    #[test]
    fn test_state_serialization() {
        let state = encode_state(&create_test_context(), &ActionCatalog::default());
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.starts_with('['));
        let parsed: RoutingState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
