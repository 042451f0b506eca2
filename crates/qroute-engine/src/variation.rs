//! Task variations, their outcomes, and the collapsed result

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::collapse::CollapseStrategy;

/// Parameters handed to a variation's work, e.g. `{"model": "gpt-4o", "temperature": 0.7}`
pub type Params = serde_json::Map<String, Value>;

/// Boxed future returned by variation work
pub type VariationFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Shared, type-erased variation work
pub type VariationWork<T> = Arc<dyn Fn(VariationContext) -> VariationFuture<T> + Send + Sync>;

/// What a running variation can see: its own id and params, plus the
/// cancellation signal raised when a sibling already won.
#[derive(Debug, Clone)]
pub struct VariationContext {
    pub variation_id: String,
    pub params: Arc<Params>,
    pub cancellation: CancellationToken,
}

impl VariationContext {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// One parameterized attempt at a task. Immutable once built.
pub struct TaskVariation<T> {
    id: String,
    params: Arc<Params>,
    work: VariationWork<T>,
}

impl<T> Clone for TaskVariation<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            params: Arc::clone(&self.params),
            work: Arc::clone(&self.work),
        }
    }
}

impl<T> std::fmt::Debug for TaskVariation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskVariation")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> TaskVariation<T> {
    /// Create a variation from an async closure
    pub fn new<F, Fut>(id: impl Into<String>, params: Params, work: F) -> Self
    where
        F: Fn(VariationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_shared(id, params, Arc::new(move |ctx| work(ctx).boxed()))
    }

    /// Create a variation reusing already type-erased work
    pub fn from_shared(id: impl Into<String>, params: Params, work: VariationWork<T>) -> Self {
        Self {
            id: id.into(),
            params: Arc::new(params),
            work,
        }
    }
}

impl<T> TaskVariation<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn start(&self, cancellation: CancellationToken) -> VariationFuture<T> {
        (self.work)(VariationContext {
            variation_id: self.id.clone(),
            params: Arc::clone(&self.params),
            cancellation,
        })
    }
}

/// Builders for common variation sets
pub struct VariationSet;

impl VariationSet {
    /// One variation per value of a single parameter, ids `"{prefix}-{i}"`.
    ///
    /// ```
    /// use qroute_engine::VariationSet;
    /// use serde_json::json;
    ///
    /// let variations = VariationSet::sweep("temp", "temperature", vec![json!(0.2), json!(0.9)], |ctx| async move {
    ///     Ok(ctx.param_f64("temperature").unwrap_or_default())
    /// });
    /// assert_eq!(variations.len(), 2);
    /// assert_eq!(variations[1].id(), "temp-1");
    /// ```
    pub fn sweep<T, F, Fut>(
        prefix: &str,
        param_name: &str,
        values: Vec<Value>,
        work: F,
    ) -> Vec<TaskVariation<T>>
    where
        T: Send + 'static,
        F: Fn(VariationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let shared: VariationWork<T> = Arc::new(move |ctx| work(ctx).boxed());
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let mut params = Params::new();
                params.insert(param_name.to_string(), value);
                TaskVariation::from_shared(format!("{prefix}-{i}"), params, Arc::clone(&shared))
            })
            .collect()
    }

    /// One variation per params map, ids `"{prefix}-{i}"`
    pub fn from_params<T, F, Fut>(prefix: &str, params: Vec<Params>, work: F) -> Vec<TaskVariation<T>>
    where
        T: Send + 'static,
        F: Fn(VariationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let shared: VariationWork<T> = Arc::new(move |ctx| work(ctx).boxed());
        params
            .into_iter()
            .enumerate()
            .map(|(i, p)| TaskVariation::from_shared(format!("{prefix}-{i}"), p, Arc::clone(&shared)))
            .collect()
    }
}

/// Error recorded when a variation exceeds its timeout
pub const TIMEOUT_ERROR: &str = "timeout";

/// Error recorded for a variation that never started because a sibling won
pub const CANCELLED_ERROR: &str = "cancelled";

/// Result of running one variation
#[derive(Debug, Clone, Serialize)]
pub struct VariationOutcome<T> {
    pub variation_id: String,
    pub value: Option<T>,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    /// Position in completion order within its `execute` call
    pub completion_index: usize,
}

impl<T> VariationOutcome<T> {
    pub fn success(variation_id: impl Into<String>, value: T, duration: Duration) -> Self {
        Self {
            variation_id: variation_id.into(),
            value: Some(value),
            success: true,
            error: None,
            duration,
            completion_index: 0,
        }
    }

    pub fn failure(variation_id: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            variation_id: variation_id.into(),
            value: None,
            success: false,
            error: Some(error.into()),
            duration,
            completion_index: 0,
        }
    }

    pub fn timed_out(variation_id: impl Into<String>, duration: Duration) -> Self {
        Self::failure(variation_id, TIMEOUT_ERROR, duration)
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(CANCELLED_ERROR)
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// The single answer produced by one `execute` call
#[derive(Debug, Clone, Serialize)]
pub struct QuantumResult<T> {
    /// `None` when no variation succeeded
    pub winning_variation_id: Option<String>,
    pub value: Option<T>,
    pub success: bool,
    /// Failure reason when `success` is false
    pub error: Option<String>,
    pub alternatives: Vec<VariationOutcome<T>>,
    pub total_duration: Duration,
    pub strategy_used: CollapseStrategy,
}

impl<T> QuantumResult<T> {
    /// Successful alternatives only, in completion order
    pub fn successful_alternatives(&self) -> impl Iterator<Item = &VariationOutcome<T>> {
        self.alternatives.iter().filter(|o| o.success)
    }
}
