//! Step runner: kind -> handler dispatch.
//!
//! `StepRunner` owns a lookup table from `StepKind` to a `StepHandler` trait
//! object, built once at startup. `run` invokes the handler for one step,
//! applies the optional per-step timeout, and wraps the outcome with timing
//! into a `StepRun` that the scheduler merges into the execution record.
//!
//! Handlers never touch the `WorkflowExecution`; they only read the step
//! definition and the snapshot of upstream results they are given.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;

use insightflow_types::config::EngineConfig;
use insightflow_types::error::CollaboratorError;
use insightflow_types::workflow::{StepDefinition, StepKind, StepResult};

use super::dag::DependencyGraph;
use super::handlers;
use crate::collaborator::Collaborators;

/// Read-only snapshot of completed step results, keyed by step ID.
pub type UpstreamResults = HashMap<String, StepResult>;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur while executing a single step.
///
/// These are always captured into the execution record; they never abort a run.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("no upstream data: {0}")]
    NoUpstreamData(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("no handler registered for step kind '{0}'")]
    NoHandler(StepKind),

    #[error("step timed out after {0}s")]
    Timeout(u64),
}

impl StepError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        StepError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Tunables shared by all handlers, derived from `EngineConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// Default insight bound when a step does not set `max_insights`.
    pub max_insights: usize,
    /// Default minimum sample count before data-driven thresholds apply.
    pub min_sample_size: usize,
    /// Per-step timeout; `None` lets slow collaborators delay the batch.
    pub step_timeout: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RunnerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_insights: config.max_insights,
            min_sample_size: config.min_sample_size,
            step_timeout: config.step_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Everything a handler may read while executing one step.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub step: &'a StepDefinition,
    pub upstream: &'a UpstreamResults,
    pub graph: &'a DependencyGraph,
    pub collaborators: &'a Collaborators,
    pub settings: &'a RunnerSettings,
}

impl<'a> StepContext<'a> {
    /// Results of the step's declared dependencies, in declaration order.
    /// Dependencies without a stored result are skipped.
    pub fn dependency_results(&self) -> impl Iterator<Item = &'a StepResult> + 'a {
        let upstream = self.upstream;
        self.step
            .depends_on
            .iter()
            .filter_map(move |dep| upstream.get(dep))
    }

    /// Integer threshold parameter, falling back to the configured sample size.
    pub fn min_samples(&self) -> usize {
        self.step
            .param_u64("min_samples")
            .map(|n| n as usize)
            .unwrap_or(self.settings.min_sample_size)
    }
}

/// One implementation per `StepKind`.
pub trait StepHandler: Send + Sync {
    fn kind(&self) -> StepKind;

    /// Produce the kind-specific payload for a step.
    fn execute<'a>(&'a self, ctx: StepContext<'a>) -> BoxFuture<'a, Result<Value, StepError>>;
}

// ---------------------------------------------------------------------------
// StepRun
// ---------------------------------------------------------------------------

/// Outcome of one step with timing, returned to the scheduler.
#[derive(Debug)]
pub struct StepRun {
    pub step_id: String,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: Result<Value, StepError>,
}

impl StepRun {
    /// The normalized result envelope, or the step's error.
    pub fn to_result(&self) -> Result<StepResult, &StepError> {
        self.outcome.as_ref().map(|payload| StepResult {
            step_id: self.step_id.clone(),
            kind: self.kind,
            payload: payload.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            elapsed_ms: self.elapsed_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Dispatches steps to the handler registered for their kind.
pub struct StepRunner {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
    settings: RunnerSettings,
}

impl StepRunner {
    /// A runner with no handlers registered.
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            handlers: HashMap::new(),
            settings,
        }
    }

    /// A runner with the built-in handler for every step kind.
    pub fn with_default_handlers(settings: RunnerSettings) -> Self {
        let mut runner = Self::new(settings);
        runner.register(Arc::new(handlers::query::QueryHandler));
        runner.register(Arc::new(handlers::statistical::StatisticalTestHandler));
        runner.register(Arc::new(handlers::analysis::AnalysisHandler));
        runner.register(Arc::new(handlers::comparison::ComparisonHandler));
        runner.register(Arc::new(handlers::aggregation::AggregationHandler));
        runner.register(Arc::new(handlers::insight::InsightHandler));
        runner
    }

    /// Register a handler, replacing any existing handler for its kind.
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn has_handler(&self, kind: StepKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Execute one step against a snapshot of upstream results.
    pub async fn run(
        &self,
        step: &StepDefinition,
        upstream: &UpstreamResults,
        graph: &DependencyGraph,
        collaborators: &Collaborators,
    ) -> StepRun {
        let started_at = Utc::now();
        let clock = Instant::now();

        let outcome = match self.handlers.get(&step.kind) {
            None => Err(StepError::NoHandler(step.kind)),
            Some(handler) => {
                let ctx = StepContext {
                    step,
                    upstream,
                    graph,
                    collaborators,
                    settings: &self.settings,
                };
                match self.settings.step_timeout {
                    None => handler.execute(ctx).await,
                    Some(limit) => match tokio::time::timeout(limit, handler.execute(ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(StepError::Timeout(limit.as_secs())),
                    },
                }
            }
        };

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        tracing::debug!(
            step_id = %step.id,
            kind = %step.kind,
            elapsed_ms,
            ok = outcome.is_ok(),
            "step finished"
        );

        StepRun {
            step_id: step.id.clone(),
            kind: step.kind,
            started_at,
            completed_at: Utc::now(),
            elapsed_ms,
            outcome,
        }
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(StepKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("StepRunner")
            .field("handlers", &kinds)
            .field("settings", &self.settings)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
