//! qroute Engine - Quantum execution of task variations
//!
//! Fans a task out into N parameterized variations, runs them on a bounded
//! worker pool with per-variation timeouts, and collapses the outcomes into
//! a single result using a pluggable policy.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod collapse;
pub mod executor;
pub mod variation;

pub use collapse::{CollapseStrategy, EquivalenceFn, ScoringFn};
pub use executor::{execute_variations, ExecuteOptions, ExecutionStats, QuantumExecutor};
pub use variation::{
    Params, QuantumResult, TaskVariation, VariationContext, VariationOutcome, VariationSet,
};
