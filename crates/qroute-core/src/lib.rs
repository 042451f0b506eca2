//! qroute Core - Shared types and ambient infrastructure
//!
//! This crate provides the error taxonomy, configuration loading and
//! tracing setup used by the execution engine and the routing agent.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod telemetry;
pub mod util;

pub use config::{
    AgentConfig, Config, EngineConfig, LoggingConfig, RewardConfig, TargetSyncConfig,
};
pub use error::{Result, RouterError};
