//! Workflow domain types for insightflow.
//!
//! Defines the immutable template side (`StepDefinition`, `WorkflowTemplate`)
//! and the mutable runtime side (`WorkflowExecution`, `StepState`,
//! `StepResult`) of an analytical workflow, plus the report shapes returned by
//! the engine's status, cancel and catalog operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in a workflow template. Immutable once the template is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step ID (e.g. "funnel_query"). Unique within its template.
    pub id: String,
    /// The kind of analytical operation this step performs.
    pub kind: StepKind,
    /// Human-readable step name.
    pub name: String,
    /// Longer description, display only.
    #[serde(default)]
    pub description: String,
    /// Open configuration map consumed by the kind-specific handler.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepDefinition {
    /// Create a step with no parameters and no dependencies.
    pub fn new(id: impl Into<String>, kind: StepKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            description: String::new(),
            parameters: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Look up a list-of-strings parameter. Non-string entries are ignored.
    pub fn param_strings(&self, key: &str) -> Vec<String> {
        self.parameters
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }
}

/// The kind of analytical operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Query,
    StatisticalTest,
    Analysis,
    Comparison,
    Aggregation,
    InsightGeneration,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Query,
        StepKind::StatisticalTest,
        StepKind::Analysis,
        StepKind::Comparison,
        StepKind::Aggregation,
        StepKind::InsightGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Query => "query",
            StepKind::StatisticalTest => "statistical_test",
            StepKind::Analysis => "analysis",
            StepKind::Comparison => "comparison",
            StepKind::Aggregation => "aggregation",
            StepKind::InsightGeneration => "insight_generation",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Workflow Template
// ---------------------------------------------------------------------------

/// A named, reusable analytical procedure.
///
/// Templates in the catalog are shared and never mutated; customization always
/// produces an independent deep copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Catalog ID (e.g. "conversion_analysis").
    pub id: String,
    pub name: String,
    pub description: String,
    /// Ordered step definitions forming the DAG.
    pub steps: Vec<StepDefinition>,
    /// Rough wall-clock estimate shown in listings (e.g. "2-3 minutes").
    #[serde(default)]
    pub estimated_duration: String,
    /// Example questions this template answers.
    #[serde(default)]
    pub use_cases: Vec<String>,
}

impl WorkflowTemplate {
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepDefinition> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// Distinct step kinds in order of first appearance.
    pub fn step_kinds(&self) -> Vec<StepKind> {
        let mut kinds = Vec::new();
        for step in &self.steps {
            if !kinds.contains(&step.kind) {
                kinds.push(step.kind);
            }
        }
        kinds
    }

    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            step_count: self.steps.len(),
            step_kinds: self.step_kinds(),
            estimated_duration: self.estimated_duration.clone(),
            use_cases: self.use_cases.clone(),
        }
    }
}

/// Catalog listing entry returned by `list_templates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub step_count: usize,
    pub step_kinds: Vec<StepKind>,
    pub estimated_duration: String,
    pub use_cases: Vec<String>,
}

// ---------------------------------------------------------------------------
// Customization
// ---------------------------------------------------------------------------

/// Sparse overrides applied to a deep copy of a catalog template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customization {
    /// Workflow-level field overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowOverrides>,
    /// Per-step overrides keyed by step ID.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub steps: HashMap<String, StepOverride>,
}

impl Customization {
    /// Override a single step parameter.
    pub fn set_param(mut self, step_id: &str, key: &str, value: Value) -> Self {
        self.steps
            .entry(step_id.to_string())
            .or_default()
            .parameters
            .insert(key.to_string(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.workflow.is_none() && self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOverride {
    /// Parameters merged key-by-key over the template's parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Replacement dependency list. The result is re-validated as a DAG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of an individual step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Can never run because a dependency failed (directly or transitively).
    Blocked,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Step runtime state
// ---------------------------------------------------------------------------

/// Per-step runtime record inside a `WorkflowExecution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock time spent in the handler, in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            elapsed_ms: 0,
        }
    }
}

/// Normalized result envelope produced by the step runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub kind: StepKind,
    /// Kind-specific payload.
    pub payload: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// A step that could never be scheduled because an upstream step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedStep {
    pub step_id: String,
    /// Failed steps upstream of this one.
    pub failed_dependencies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Workflow Execution
// ---------------------------------------------------------------------------

/// Runtime record for one instantiation of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution ID, generated at creation.
    pub id: Uuid,
    /// Catalog ID of the template this execution was created from.
    pub template_id: String,
    /// Deep copy of the (possibly customized) template.
    pub template: WorkflowTemplate,
    pub status: ExecutionStatus,
    /// Per-step runtime state keyed by step ID.
    pub steps: HashMap<String, StepState>,
    /// Step IDs in completion order.
    pub completed_steps: Vec<String>,
    /// Step IDs in failure order.
    pub failed_steps: Vec<String>,
    /// Steps left unscheduled because of a failed dependency.
    #[serde(default)]
    pub blocked_steps: Vec<BlockedStep>,
    /// Accumulated results keyed by step ID (completed steps only).
    pub results: HashMap<String, StepResult>,
    /// Synthesized insights, populated once all steps are terminal.
    #[serde(default)]
    pub insights: Vec<String>,
    /// Engine-level error (e.g. circular dependency).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Instantiate a pending execution from an (already copied) template.
    pub fn new(template: WorkflowTemplate) -> Self {
        let steps = template
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepState::default()))
            .collect();
        Self {
            id: Uuid::now_v7(),
            template_id: template.id.clone(),
            template,
            status: ExecutionStatus::Pending,
            steps,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            blocked_steps: Vec::new(),
            results: HashMap::new(),
            insights: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.template.steps.len()
    }

    /// First step (in template order) currently marked running.
    pub fn current_step(&self) -> Option<&str> {
        self.template
            .steps
            .iter()
            .find(|s| {
                self.steps
                    .get(&s.id)
                    .is_some_and(|st| st.status == StepStatus::Running)
            })
            .map(|s| s.id.as_str())
    }

    /// Sum of elapsed time over completed and failed steps.
    pub fn total_step_time_ms(&self) -> u64 {
        self.steps
            .values()
            .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Failed))
            .map(|s| s.elapsed_ms)
            .sum()
    }

    pub fn status_report(&self) -> ExecutionStatusReport {
        ExecutionStatusReport {
            execution_id: self.id,
            template_id: self.template_id.clone(),
            status: self.status,
            completed_count: self.completed_steps.len(),
            total_count: self.total_steps(),
            failed_count: self.failed_steps.len(),
            blocked_count: self.blocked_steps.len(),
            current_step: self.current_step().map(String::from),
        }
    }
}

/// Snapshot returned by the engine's `status` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub execution_id: Uuid,
    pub template_id: String,
    pub status: ExecutionStatus,
    pub completed_count: usize,
    pub total_count: usize,
    pub failed_count: usize,
    pub blocked_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

/// Result of cancelling an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub completed_count: usize,
    pub total_count: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
