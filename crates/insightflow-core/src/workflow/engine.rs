//! Workflow engine: the operations exposed to the CLI and REST adapters.
//!
//! The engine owns the active-execution table and a bounded history. A
//! created execution sits in the active table (pending) until it is run or
//! cancelled. While it runs, the scheduler owns a private copy of the record
//! and publishes snapshots into the table after each batch, so `status`
//! reflects progress. Finished and cancelled executions move to history,
//! oldest evicted first once `history_limit` is reached.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use insightflow_types::config::EngineConfig;
use insightflow_types::error::WorkflowError;
use insightflow_types::event::WorkflowEvent;
use insightflow_types::workflow::{
    CancelReport, Customization, ExecutionStatus, ExecutionStatusReport, StepStatus,
    TemplateSummary, WorkflowExecution,
};

use super::catalog::TemplateCatalog;
use super::scheduler::Scheduler;
use super::step_runner::{RunnerSettings, StepRunner};
use super::synthesizer::{SynthesisOptions, synthesize};
use crate::collaborator::Collaborators;
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced to callers of engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("unknown execution '{0}'")]
    UnknownExecution(Uuid),

    #[error("execution '{0}' is already running")]
    AlreadyRunning(Uuid),

    #[error("execution '{0}' was cancelled")]
    Cancelled(Uuid),

    #[error("circular dependency among steps: {}", .steps.join(", "))]
    CircularDependency { steps: Vec<String> },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

struct ActiveExecution {
    snapshot: WorkflowExecution,
    cancel: CancellationToken,
    running: bool,
}

pub struct WorkflowEngine {
    catalog: Arc<TemplateCatalog>,
    config: EngineConfig,
    scheduler: Scheduler,
    events: EventBus,
    active: DashMap<Uuid, ActiveExecution>,
    history: Mutex<VecDeque<WorkflowExecution>>,
}

impl WorkflowEngine {
    /// Engine over the built-in catalog with the default step handlers.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_catalog(TemplateCatalog::builtin(), config)
    }

    pub fn with_catalog(catalog: Arc<TemplateCatalog>, config: EngineConfig) -> Self {
        let runner = StepRunner::with_default_handlers(RunnerSettings::from(&config));
        let events = EventBus::new(config.event_capacity);
        Self {
            catalog,
            scheduler: Scheduler::new(Arc::new(runner), events.clone()),
            events,
            active: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every `WorkflowEvent` published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.catalog.list_templates()
    }

    /// Instantiate a pending execution from a catalog template.
    pub fn create_execution(
        &self,
        template_id: &str,
        customization: Option<&Customization>,
    ) -> Result<WorkflowExecution, EngineError> {
        let template = match customization.filter(|c| !c.is_empty()) {
            Some(custom) => self
                .catalog
                .customize(template_id, custom)
                .map_err(|e| match e {
                    WorkflowError::UnknownTemplate(id) => EngineError::UnknownTemplate(id),
                    other => EngineError::Workflow(other),
                })?,
            None => self
                .catalog
                .get(template_id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownTemplate(template_id.to_string()))?,
        };

        let execution = WorkflowExecution::new(template);
        tracing::info!(
            execution_id = %execution.id,
            template_id,
            customized = customization.is_some_and(|c| !c.is_empty()),
            "execution created"
        );
        self.active.insert(
            execution.id,
            ActiveExecution {
                snapshot: execution.clone(),
                cancel: CancellationToken::new(),
                running: false,
            },
        );
        Ok(execution)
    }

    /// Run an active execution to completion.
    ///
    /// Step failures are recorded on the returned record, not returned as
    /// errors. A cycle fails the execution and archives it.
    pub async fn run(
        &self,
        execution_id: Uuid,
        collaborators: &Collaborators,
    ) -> Result<WorkflowExecution, EngineError> {
        let (mut execution, cancel) = {
            let mut entry = self
                .active
                .get_mut(&execution_id)
                .ok_or(EngineError::UnknownExecution(execution_id))?;
            if entry.running {
                return Err(EngineError::AlreadyRunning(execution_id));
            }
            entry.running = true;
            (entry.snapshot.clone(), entry.cancel.clone())
        };
        let mut guard = RunGuard {
            engine: self,
            execution_id,
            armed: true,
        };

        let active = &self.active;
        let outcome = self
            .scheduler
            .execute(&mut execution, collaborators, &cancel, |snapshot| {
                if let Some(mut entry) = active.get_mut(&execution_id) {
                    entry.snapshot = snapshot.clone();
                }
            })
            .await;
        guard.armed = false;

        // A concurrent cancel already archived the execution.
        if self.active.remove(&execution_id).is_none() {
            return Err(EngineError::Cancelled(execution_id));
        }

        let finished_at = Utc::now();
        let duration_ms = execution
            .started_at
            .map(|start| (finished_at - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        match outcome {
            Ok(()) => {
                execution.insights = synthesize(
                    &execution,
                    &SynthesisOptions {
                        slow_threshold_ms: self.config.slow_workflow_threshold_ms,
                        max_insights: self.config.max_insights,
                    },
                );
                execution.status = ExecutionStatus::Completed;
                execution.completed_at = Some(finished_at);
                self.events.publish(WorkflowEvent::ExecutionCompleted {
                    execution_id,
                    completed: execution.completed_steps.len(),
                    failed: execution.failed_steps.len(),
                    blocked: execution.blocked_steps.len(),
                    duration_ms,
                });
                tracing::info!(
                    execution_id = %execution_id,
                    completed = execution.completed_steps.len(),
                    total = execution.total_steps(),
                    duration_ms,
                    "execution completed"
                );
                self.archive(execution.clone());
                Ok(execution)
            }
            Err(EngineError::Cancelled(_)) => {
                // Token tripped outside `cancel`; archive what we have.
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(finished_at);
                self.events.publish(WorkflowEvent::ExecutionCancelled { execution_id });
                self.archive(execution);
                Err(EngineError::Cancelled(execution_id))
            }
            Err(e) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(e.to_string());
                execution.completed_at = Some(finished_at);
                self.events.publish(WorkflowEvent::ExecutionFailed {
                    execution_id,
                    error: e.to_string(),
                });
                tracing::error!(execution_id = %execution_id, error = %e, "execution failed");
                self.archive(execution);
                Err(e)
            }
        }
    }

    /// Progress of an active or archived execution.
    pub fn status(&self, execution_id: Uuid) -> Result<ExecutionStatusReport, EngineError> {
        self.get_execution(execution_id)
            .map(|e| e.status_report())
            .ok_or(EngineError::UnknownExecution(execution_id))
    }

    /// Cancel an active execution and move it to history.
    pub fn cancel(&self, execution_id: Uuid) -> Result<CancelReport, EngineError> {
        let (_, entry) = self
            .active
            .remove(&execution_id)
            .ok_or(EngineError::UnknownExecution(execution_id))?;
        entry.cancel.cancel();

        let mut execution = entry.snapshot;
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        let report = CancelReport {
            execution_id,
            status: execution.status,
            completed_count: execution.completed_steps.len(),
            total_count: execution.total_steps(),
        };

        self.events.publish(WorkflowEvent::ExecutionCancelled { execution_id });
        tracing::info!(
            execution_id = %execution_id,
            was_running = entry.running,
            completed = report.completed_count,
            "execution cancelled"
        );
        self.archive(execution);
        Ok(report)
    }

    /// Current record of an execution, active first, then history.
    pub fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        if let Some(entry) = self.active.get(&execution_id) {
            return Some(entry.snapshot.clone());
        }
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|e| e.id == execution_id)
            .cloned()
    }

    /// Archived executions, oldest first.
    pub fn history(&self) -> Vec<WorkflowExecution> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Archive a running execution whose `run` future was dropped.
    fn abandon(&self, execution_id: Uuid) {
        let Some((_, entry)) = self.active.remove(&execution_id) else {
            return;
        };
        entry.cancel.cancel();

        let mut execution = entry.snapshot;
        execution.status = ExecutionStatus::Cancelled;
        execution.error = Some("run interrupted before completion".to_string());
        // Interrupted steps never finished; they go back to pending.
        for state in execution.steps.values_mut() {
            if state.status == StepStatus::Running {
                state.status = StepStatus::Pending;
                state.started_at = None;
            }
        }
        execution.completed_at = Some(Utc::now());

        self.events.publish(WorkflowEvent::ExecutionCancelled { execution_id });
        tracing::warn!(
            execution_id = %execution_id,
            completed = execution.completed_steps.len(),
            "run dropped before completion; execution archived as cancelled"
        );
        self.archive(execution);
    }

    fn archive(&self, execution: WorkflowExecution) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(execution);
        while history.len() > self.config.history_limit {
            if let Some(evicted) = history.pop_front() {
                tracing::debug!(execution_id = %evicted.id, "evicted execution from history");
            }
        }
    }
}

/// Archives the execution if the `run` future is dropped mid-flight.
struct RunGuard<'a> {
    engine: &'a WorkflowEngine,
    execution_id: Uuid,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.abandon(self.execution_id);
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("templates", &self.catalog.templates().len())
            .field("active", &self.active.len())
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
