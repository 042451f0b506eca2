//! Routing actions and the catalog that indexes them

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use qroute_core::util::performance_key;
use qroute_core::{Result, RouterError};

/// How a request should be served once a provider/model is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Latency and quality first
    Performance,
    Balanced,
    /// Cheapest acceptable option
    Economy,
}

impl RoutingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Balanced => "balanced",
            Self::Economy => "economy",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider/model/strategy choice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingAction {
    pub provider: String,
    pub model: String,
    pub strategy: RoutingStrategy,
}

impl RoutingAction {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        strategy: RoutingStrategy,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            strategy,
        }
    }

    /// `"{provider}:{model}"`, the routing performance key
    pub fn key(&self) -> String {
        performance_key(&self.provider, &self.model)
    }
}

impl fmt::Display for RoutingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.provider, self.model, self.strategy)
    }
}

/// Versioned lookup table mapping actions to dense indices `[0, len)`.
///
/// Entries are unique, so `encode(decode(i)) == i` for every valid index.
/// Out-of-range indices decode to the entry at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawCatalog")]
pub struct ActionCatalog {
    version: u32,
    actions: Vec<RoutingAction>,
}

/// Wire form of [`ActionCatalog`], checked by `ActionCatalog::new` on the way in
#[derive(Deserialize)]
struct RawCatalog {
    version: u32,
    actions: Vec<RoutingAction>,
}

impl TryFrom<RawCatalog> for ActionCatalog {
    type Error = RouterError;

    fn try_from(raw: RawCatalog) -> Result<Self> {
        Self::new(raw.version, raw.actions)
    }
}

impl ActionCatalog {
    pub fn new(version: u32, actions: Vec<RoutingAction>) -> Result<Self> {
        if actions.is_empty() {
            return Err(RouterError::configuration("action catalog must not be empty"));
        }
        let mut seen = HashSet::with_capacity(actions.len());
        for action in &actions {
            if !seen.insert(action) {
                return Err(RouterError::configuration(format!(
                    "duplicate action in catalog: {action}"
                )));
            }
        }
        Ok(Self { version, actions })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[RoutingAction] {
        &self.actions
    }

    /// Index of `action`, `None` if it is not in this catalog
    pub fn encode(&self, action: &RoutingAction) -> Option<usize> {
        self.actions.iter().position(|a| a == action)
    }

    pub fn decode(&self, index: usize) -> &RoutingAction {
        self.actions.get(index).unwrap_or(&self.actions[0])
    }

    /// Distinct providers in first-appearance order
    pub fn providers(&self) -> Vec<&str> {
        let mut providers: Vec<&str> = Vec::new();
        for action in &self.actions {
            if !providers.contains(&action.provider.as_str()) {
                providers.push(&action.provider);
            }
        }
        providers
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        use RoutingStrategy::{Balanced, Economy, Performance};

        let actions = [
            ("openai", "gpt-4o", Balanced),
            ("openai", "gpt-4o", Performance),
            ("openai", "gpt-4o-mini", Economy),
            ("anthropic", "claude-3-5-sonnet", Balanced),
            ("anthropic", "claude-3-5-sonnet", Performance),
            ("anthropic", "claude-3-haiku", Economy),
            ("google", "gemini-1.5-pro", Balanced),
            ("google", "gemini-1.5-flash", Economy),
            ("xai", "grok-2", Performance),
            ("xai", "grok-2", Balanced),
            ("local", "llama-3.1-70b", Balanced),
            ("local", "llama-3.1-8b", Economy),
        ]
        .into_iter()
        .map(|(provider, model, strategy)| RoutingAction::new(provider, model, strategy))
        .collect();

        Self {
            version: 1,
            actions,
        }
    }
}
