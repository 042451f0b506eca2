//! Configuration loading for qroute

use std::path::PathBuf;
use std::time::Duration;

use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub agent: AgentConfig,
    pub reward: RewardConfig,
    pub logging: LoggingConfig,
}

/// Quantum execution engine defaults, overridable per call
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub variation_timeout_ms: u64,
    /// Variation error messages are truncated to this many characters
    pub max_error_chars: usize,
}

impl EngineConfig {
    pub fn variation_timeout(&self) -> Duration {
        Duration::from_millis(self.variation_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            variation_timeout_ms: 30_000,
            max_error_chars: 512,
        }
    }
}

/// Value network layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkArchitecture {
    /// Two hidden layers
    #[default]
    Standard,
    /// Four hidden layers
    Deep,
    /// Two small hidden layers
    Lightweight,
}

impl NetworkArchitecture {
    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Deep => "deep",
            Self::Lightweight => "lightweight",
        }
    }

    /// Hidden layer widths, input to output
    pub fn hidden_layers(self) -> &'static [usize] {
        match self {
            Self::Standard => &[64, 64],
            Self::Deep => &[128, 128, 64, 32],
            Self::Lightweight => &[32, 16],
        }
    }
}

/// How the target network follows the live network
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TargetSyncConfig {
    /// Exact copy every `every` training steps
    Hard { every: u64 },
    /// Polyak averaging after every training step
    Soft { tau: f64 },
}

impl Default for TargetSyncConfig {
    fn default() -> Self {
        Self::Hard { every: 100 }
    }
}

/// Routing agent hyperparameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub gamma: f64,
    pub exploration_rate: f64,
    pub exploration_min: f64,
    pub exploration_decay: f64,
    pub batch_size: usize,
    pub memory_size: usize,
    pub target_sync: TargetSyncConfig,
    pub architecture: NetworkArchitecture,
    pub history_limit: usize,
    /// Fixed seed for weight init and action sampling; entropy when unset
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            gamma: 0.95,
            exploration_rate: 1.0,
            exploration_min: 0.01,
            exploration_decay: 0.995,
            batch_size: 32,
            memory_size: 2000,
            target_sync: TargetSyncConfig::default(),
            architecture: NetworkArchitecture::default(),
            history_limit: 1000,
            seed: None,
        }
    }
}

impl AgentConfig {
    /// Reject hyperparameters the agent cannot train with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(RouterError::configuration("agent.gamma must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(RouterError::configuration(
                "agent.exploration_rate must be in [0, 1]",
            ));
        }
        if self.exploration_min > self.exploration_rate {
            return Err(RouterError::configuration(
                "agent.exploration_min must not exceed agent.exploration_rate",
            ));
        }
        if !(0.0..=1.0).contains(&self.exploration_decay) {
            return Err(RouterError::configuration(
                "agent.exploration_decay must be in [0, 1]",
            ));
        }
        if self.batch_size == 0 || self.memory_size == 0 {
            return Err(RouterError::configuration(
                "agent.batch_size and agent.memory_size must be positive",
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(RouterError::configuration("agent.learning_rate must be positive"));
        }
        match self.target_sync {
            TargetSyncConfig::Soft { tau } if !(tau > 0.0 && tau <= 1.0) => {
                return Err(RouterError::configuration(
                    "agent.target_sync.tau must be in (0, 1]",
                ));
            }
            TargetSyncConfig::Hard { every: 0 } => {
                return Err(RouterError::configuration(
                    "agent.target_sync.every must be positive",
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

/// Reward shaping baselines and bonuses
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Seconds
    pub baseline_response_time: f64,
    pub baseline_quality: f64,
    /// Responses faster than this (seconds) earn `latency_bonus`
    pub latency_threshold: f64,
    pub latency_bonus: f64,
    pub quality_weight: f64,
    pub failure_penalty: f64,
    pub deviation_weight: f64,
    pub cost_weight: f64,
    pub high_quality_threshold: f64,
    pub performance_strategy_bonus: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            baseline_response_time: 2.0,
            baseline_quality: 0.7,
            latency_threshold: 1.0,
            latency_bonus: 0.2,
            quality_weight: 0.5,
            failure_penalty: 1.0,
            deviation_weight: 0.5,
            cost_weight: 0.1,
            high_quality_threshold: 0.8,
            performance_strategy_bonus: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config_path = Self::find_config_file();

        let mut builder = ConfigBuilder::<config::builder::DefaultState>::default();

        if let Some(path) = &config_path {
            tracing::info!("Loading config from: {:?}", path);
            builder = builder.add_source(File::from(path.clone()).required(false));
        } else {
            tracing::info!("No config file found, using defaults");
        }

        // QROUTE__AGENT__BATCH_SIZE=64 style overrides
        builder = builder.add_source(
            Environment::with_prefix("QROUTE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML document, missing keys take defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine or agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_workers == 0 {
            return Err(RouterError::configuration("engine.max_workers must be >= 1"));
        }
        if self.engine.variation_timeout_ms == 0 {
            return Err(RouterError::configuration(
                "engine.variation_timeout_ms must be positive",
            ));
        }

        self.agent.validate()
    }

    /// Find the configuration file
    fn find_config_file() -> Option<PathBuf> {
        // Check in order: QROUTE_CONFIG env, ./qroute.toml, ~/.config/qroute/qroute.toml
        if let Ok(path) = std::env::var("QROUTE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let local = PathBuf::from("qroute.toml");
        if local.exists() {
            return Some(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config").join("qroute").join("qroute.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.memory_size, 2000);
        assert_eq!(config.engine.variation_timeout(), Duration::from_secs(30));
        assert_eq!(config.agent.target_sync, TargetSyncConfig::Hard { every: 100 });
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml_str(
            r#"
            [engine]
            max_workers = 8

            [agent]
            batch_size = 16
            architecture = "deep"
            target_sync = { mode = "soft", tau = 0.05 }
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.max_workers, 8);
        assert_eq!(config.engine.variation_timeout_ms, 30_000);
        assert_eq!(config.agent.batch_size, 16);
        assert_eq!(config.agent.architecture, NetworkArchitecture::Deep);
        assert_eq!(config.agent.target_sync, TargetSyncConfig::Soft { tau: 0.05 });
        assert_eq!(config.agent.gamma, 0.95);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.engine.max_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(RouterError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_tau() {
        let mut config = Config::default();
        config.agent.target_sync = TargetSyncConfig::Soft { tau: 0.0 };
        assert!(config.validate().is_err());

        config.agent.target_sync = TargetSyncConfig::Soft { tau: 1.0 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_exploration() {
        let mut config = Config::default();
        config.agent.exploration_rate = 0.005;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_architecture_layers() {
        assert_eq!(NetworkArchitecture::Standard.hidden_layers().len(), 2);
        assert_eq!(NetworkArchitecture::Deep.hidden_layers().len(), 4);
        assert_eq!(NetworkArchitecture::Lightweight.hidden_layers().len(), 2);
        assert!(
            NetworkArchitecture::Lightweight.hidden_layers()[0]
                < NetworkArchitecture::Standard.hidden_layers()[0]
        );
    }
}
