//! Quantum executor - bounded concurrent fan-out under a per-call deadline

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use qroute_core::util::safe_truncate_with_ellipsis;
use qroute_core::{EngineConfig, Result, RouterError};

use crate::collapse::{collapse, CollapseStrategy, EquivalenceFn, ScoringFn};
use crate::variation::{QuantumResult, TaskVariation, VariationOutcome, CANCELLED_ERROR};

/// Per-call options for [`QuantumExecutor::execute`]
pub struct ExecuteOptions<T> {
    pub scoring_fn: Option<ScoringFn<T>>,
    pub equivalence: Option<EquivalenceFn<T>>,
    /// Overrides `EngineConfig::max_workers`
    pub max_workers: Option<usize>,
    /// Overrides `EngineConfig::variation_timeout_ms`
    pub timeout: Option<Duration>,
}

impl<T> Default for ExecuteOptions<T> {
    fn default() -> Self {
        Self {
            scoring_fn: None,
            equivalence: None,
            max_workers: None,
            timeout: None,
        }
    }
}

impl<T> ExecuteOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scoring(mut self, scoring: impl Fn(&T) -> f64 + Send + Sync + 'static) -> Self {
        self.scoring_fn = Some(Arc::new(scoring));
        self
    }

    pub fn with_equivalence(
        mut self,
        equivalence: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.equivalence = Some(Arc::new(equivalence));
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Cumulative statistics across `execute` calls
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub executions_by_strategy: HashMap<CollapseStrategy, u64>,
    pub total_variations: u64,
    pub timed_out_variations: u64,
    pub cancelled_variations: u64,
    pub total_duration_ms: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_executions as f64
        }
    }
}

/// Runs task variations concurrently and collapses their outcomes
pub struct QuantumExecutor {
    config: EngineConfig,
    stats: RwLock<ExecutionStats>,
}

impl QuantumExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(ExecutionStats::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every variation on a pool of at most `max_workers` concurrent
    /// workers and collapse the outcomes with `strategy`.
    ///
    /// Only invalid configuration is an error; variation failures and
    /// timeouts are reported inside the returned [`QuantumResult`].
    pub async fn execute<T>(
        &self,
        variations: Vec<TaskVariation<T>>,
        strategy: CollapseStrategy,
        options: ExecuteOptions<T>,
    ) -> Result<QuantumResult<T>>
    where
        T: PartialEq + Send + 'static,
    {
        let max_workers = options.max_workers.unwrap_or(self.config.max_workers);
        let timeout = options.timeout.unwrap_or_else(|| self.config.variation_timeout());
        validate(&variations, strategy, options.scoring_fn.is_some(), max_workers, timeout)?;

        let started = Instant::now();
        // Queueing for a worker slot counts against the same deadline
        let deadline = started + timeout;
        let submitted = variations.len();
        let semaphore = Arc::new(Semaphore::new(max_workers));
        let cancellation = CancellationToken::new();
        let max_error_chars = self.config.max_error_chars;

        debug!(
            "Executing {} variations with strategy {} (max_workers={}, timeout={:?})",
            submitted, strategy, max_workers, timeout
        );

        let mut tasks = JoinSet::new();
        let mut task_ids = HashMap::with_capacity(submitted);
        for variation in variations {
            let id = variation.id().to_string();
            let handle = tasks.spawn(run_variation(
                variation,
                Arc::clone(&semaphore),
                cancellation.clone(),
                deadline,
                max_error_chars,
            ));
            task_ids.insert(handle.id(), id);
        }

        let mut outcomes: Vec<VariationOutcome<T>> = Vec::with_capacity(submitted);
        let mut early_winner = None;

        while let Some(joined) = tasks.join_next_with_id().await {
            let mut outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(e) => join_failure(&mut task_ids, &e, max_error_chars),
            };
            outcome.completion_index = outcomes.len();

            if strategy == CollapseStrategy::FirstSuccess && outcome.success {
                early_winner = Some(outcome);
                break;
            }
            outcomes.push(outcome);
        }

        // Anything still in flight lost the race; its outcome is discarded.
        let cancelled = tasks.len();
        if cancelled > 0 {
            cancellation.cancel();
            tasks.abort_all();
        }
        drop(tasks);

        let timed_out = outcomes.iter().filter(|o| o.is_timeout()).count();

        let result = match early_winner {
            Some(winner) => QuantumResult {
                winning_variation_id: Some(winner.variation_id),
                value: winner.value,
                success: true,
                error: None,
                alternatives: outcomes,
                total_duration: started.elapsed(),
                strategy_used: strategy,
            },
            None => {
                let collapsed = collapse(
                    strategy,
                    outcomes,
                    options.scoring_fn.as_ref(),
                    options.equivalence.as_ref(),
                );
                match collapsed.winner {
                    Some(winner) => QuantumResult {
                        winning_variation_id: Some(winner.variation_id),
                        value: winner.value,
                        success: true,
                        error: None,
                        alternatives: collapsed.alternatives,
                        total_duration: started.elapsed(),
                        strategy_used: strategy,
                    },
                    None => QuantumResult {
                        winning_variation_id: None,
                        value: None,
                        success: false,
                        error: collapsed.failure_reason,
                        alternatives: collapsed.alternatives,
                        total_duration: started.elapsed(),
                        strategy_used: strategy,
                    },
                }
            }
        };

        debug!(
            "Collapse {} finished: success={}, winner={:?}, {} cancelled, took {:?}",
            strategy, result.success, result.winning_variation_id, cancelled, result.total_duration
        );

        self.record(&result, submitted, timed_out, cancelled).await;

        Ok(result)
    }

    async fn record(
        &self,
        result: &QuantumResult<impl Sized>,
        submitted: usize,
        timed_out: usize,
        cancelled: usize,
    ) {
        let mut stats = self.stats.write().await;
        stats.total_executions += 1;
        if result.success {
            stats.successful_executions += 1;
        } else {
            stats.failed_executions += 1;
        }
        *stats
            .executions_by_strategy
            .entry(result.strategy_used)
            .or_insert(0) += 1;
        stats.total_variations += submitted as u64;
        stats.timed_out_variations += timed_out as u64;
        stats.cancelled_variations += cancelled as u64;
        stats.total_duration_ms += result.total_duration.as_millis() as u64;
        stats.last_execution = Some(Utc::now());
    }

    /// Snapshot of cumulative statistics
    pub async fn stats(&self) -> ExecutionStats {
        self.stats.read().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = ExecutionStats::default();
    }
}

impl Default for QuantumExecutor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Stand-alone form of [`QuantumExecutor::execute`] with explicit pool size and timeout
pub async fn execute_variations<T>(
    variations: Vec<TaskVariation<T>>,
    strategy: CollapseStrategy,
    scoring_fn: Option<ScoringFn<T>>,
    max_workers: usize,
    per_variation_timeout: Duration,
) -> Result<QuantumResult<T>>
where
    T: PartialEq + Send + 'static,
{
    let options = ExecuteOptions {
        scoring_fn,
        equivalence: None,
        max_workers: Some(max_workers),
        timeout: Some(per_variation_timeout),
    };
    QuantumExecutor::default().execute(variations, strategy, options).await
}

fn validate<T>(
    variations: &[TaskVariation<T>],
    strategy: CollapseStrategy,
    has_scoring: bool,
    max_workers: usize,
    timeout: Duration,
) -> Result<()> {
    if variations.is_empty() {
        return Err(RouterError::configuration("variation set must not be empty"));
    }
    if max_workers == 0 {
        return Err(RouterError::configuration("max_workers must be >= 1"));
    }
    if timeout.is_zero() {
        return Err(RouterError::configuration("per-variation timeout must be positive"));
    }
    if strategy.requires_scoring() && !has_scoring {
        return Err(RouterError::configuration(format!(
            "{strategy} collapse requires a scoring function"
        )));
    }

    let mut seen = HashSet::with_capacity(variations.len());
    for variation in variations {
        if !seen.insert(variation.id()) {
            return Err(RouterError::configuration(format!(
                "duplicate variation id: {}",
                variation.id()
            )));
        }
    }

    Ok(())
}

/// Turn a task that could not be joined into a failed outcome for its variation.
fn join_failure<T>(
    task_ids: &mut HashMap<tokio::task::Id, String>,
    error: &JoinError,
    max_error_chars: usize,
) -> VariationOutcome<T> {
    let id = task_ids
        .remove(&error.id())
        .unwrap_or_else(|| format!("task-{}", error.id()));
    warn!("Variation {} task failed to join: {}", id, error);
    VariationOutcome::failure(
        id,
        safe_truncate_with_ellipsis(&format!("join error: {error}"), max_error_chars),
        Duration::ZERO,
    )
}

/// Wait for a worker slot, then run one variation. Both the wait and the
/// work must finish before `deadline`.
async fn run_variation<T: Send + 'static>(
    variation: TaskVariation<T>,
    semaphore: Arc<Semaphore>,
    cancellation: CancellationToken,
    deadline: Instant,
    max_error_chars: usize,
) -> VariationOutcome<T> {
    let id = variation.id().to_string();
    let queued = Instant::now();

    let permit = tokio::select! {
        permit = tokio::time::timeout_at(deadline, semaphore.acquire_owned()) => permit,
        () = cancellation.cancelled() => {
            return VariationOutcome::failure(id, CANCELLED_ERROR, Duration::ZERO);
        }
    };
    let _permit = match permit {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return VariationOutcome::failure(id, "worker pool closed", Duration::ZERO);
        }
        Err(_) => {
            debug!("Variation {} never got a worker slot before the deadline", id);
            return VariationOutcome::timed_out(id, queued.elapsed());
        }
    };

    let started = Instant::now();
    let work = AssertUnwindSafe(async { variation.start(cancellation.clone()).await }).catch_unwind();

    match tokio::time::timeout_at(deadline, work).await {
        Ok(Ok(Ok(value))) => VariationOutcome::success(id, value, started.elapsed()),
        Ok(Ok(Err(e))) => {
            let message = format!("{e:#}");
            VariationOutcome::failure(
                id,
                safe_truncate_with_ellipsis(&message, max_error_chars),
                started.elapsed(),
            )
        }
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            warn!("Variation {} panicked: {}", id, message);
            VariationOutcome::failure(
                id,
                safe_truncate_with_ellipsis(&format!("panicked: {message}"), max_error_chars),
                started.elapsed(),
            )
        }
        Err(_) => {
            debug!("Variation {} timed out after {:?}", id, queued.elapsed());
            VariationOutcome::timed_out(id, started.elapsed())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
