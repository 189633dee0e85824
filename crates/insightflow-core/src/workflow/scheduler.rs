//! Ready-frontier scheduler.
//!
//! Each iteration computes the steps whose dependencies have all completed,
//! dispatches the whole frontier concurrently on a `JoinSet`, and joins every
//! task before merging outcomes into the execution and recomputing the
//! frontier. Tasks receive an owned snapshot of the results completed in
//! earlier batches; only the scheduler writes to the execution record.
//!
//! # Termination
//!
//! When the frontier is empty while steps remain, the remaining steps are
//! split in two. Steps with a failed ancestor are recorded as blocked and the
//! run ends normally. Anything else can only be waiting on itself, so the run
//! aborts with `CircularDependency` naming those steps.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use insightflow_types::event::WorkflowEvent;
use insightflow_types::workflow::{ExecutionStatus, StepStatus, WorkflowExecution};

use super::dag::DependencyGraph;
use super::engine::EngineError;
use super::step_runner::{StepRun, StepRunner, UpstreamResults};
use crate::collaborator::Collaborators;
use crate::event::EventBus;

/// Drives one execution's steps to a terminal state.
#[derive(Debug, Clone)]
pub struct Scheduler {
    runner: Arc<StepRunner>,
    events: EventBus,
}

impl Scheduler {
    pub fn new(runner: Arc<StepRunner>, events: EventBus) -> Self {
        Self { runner, events }
    }

    /// Run every reachable step of `execution`.
    ///
    /// `on_progress` is called with the updated record after each dispatch and
    /// after each joined batch. Cancellation is checked between batches; steps
    /// already dispatched run to completion and the run returns `Cancelled`.
    ///
    /// On `Ok`, every step is completed, failed, or blocked. The execution's
    /// overall status is left for the caller to settle.
    pub async fn execute<F>(
        &self,
        execution: &mut WorkflowExecution,
        collaborators: &Collaborators,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut(&WorkflowExecution) + Send,
    {
        let execution_id = execution.id;
        let graph = Arc::new(DependencyGraph::new(&execution.template.steps));
        graph.check_references()?;

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.events.publish(WorkflowEvent::ExecutionStarted {
            execution_id,
            template_id: execution.template_id.clone(),
            total_steps: graph.len(),
        });
        tracing::info!(
            execution_id = %execution_id,
            template_id = %execution.template_id,
            steps = graph.len(),
            "execution started"
        );

        let mut completed: HashSet<String> = execution.completed_steps.iter().cloned().collect();
        let mut failed: HashSet<String> = execution.failed_steps.iter().cloned().collect();
        let mut batch = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(execution_id = %execution_id, batch, "execution cancelled between batches");
                return Err(EngineError::Cancelled(execution_id));
            }

            let ready = graph.ready_frontier(&completed, &failed);
            if ready.is_empty() {
                self.settle_remaining(execution, &graph, &completed, &failed)?;
                break;
            }

            batch += 1;
            tracing::debug!(
                execution_id = %execution_id,
                batch,
                steps = ready.len(),
                "dispatching batch"
            );
            self.events.publish(WorkflowEvent::BatchDispatched {
                execution_id,
                batch,
                step_ids: ready.clone(),
            });

            let upstream: Arc<UpstreamResults> = Arc::new(execution.results.clone());
            let mut join_set = JoinSet::new();
            let mut in_flight: HashSet<String> = HashSet::new();

            for step_id in &ready {
                let Some(step) = execution.template.step(step_id).cloned() else {
                    continue;
                };
                if let Some(state) = execution.steps.get_mut(step_id) {
                    state.status = StepStatus::Running;
                    state.started_at = Some(Utc::now());
                }
                in_flight.insert(step_id.clone());

                let runner = Arc::clone(&self.runner);
                let graph = Arc::clone(&graph);
                let upstream = Arc::clone(&upstream);
                let collaborators = collaborators.clone();
                let events = self.events.clone();

                join_set.spawn(async move {
                    events.publish(WorkflowEvent::StepStarted {
                        execution_id,
                        step_id: step.id.clone(),
                        kind: step.kind,
                    });
                    runner.run(&step, &upstream, &graph, &collaborators).await
                });
            }
            on_progress(&*execution);

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(run) => {
                        in_flight.remove(&run.step_id);
                        self.record(execution, run, &mut completed, &mut failed);
                    }
                    Err(e) => {
                        tracing::error!(execution_id = %execution_id, error = %e, "step task failed to join");
                    }
                }
            }

            // Tasks that panicked never returned a StepRun.
            for step_id in in_flight {
                let error = "step task panicked before returning a result".to_string();
                if let Some(state) = execution.steps.get_mut(&step_id) {
                    state.status = StepStatus::Failed;
                    state.error = Some(error.clone());
                    state.completed_at = Some(Utc::now());
                }
                self.events.publish(WorkflowEvent::StepFailed {
                    execution_id,
                    step_id: step_id.clone(),
                    error,
                });
                execution.failed_steps.push(step_id.clone());
                failed.insert(step_id);
            }

            on_progress(&*execution);
        }

        tracing::info!(
            execution_id = %execution_id,
            batches = batch,
            completed = execution.completed_steps.len(),
            failed = execution.failed_steps.len(),
            blocked = execution.blocked_steps.len(),
            "all reachable steps finished"
        );
        Ok(())
    }

    /// Merge one step outcome into the execution.
    fn record(
        &self,
        execution: &mut WorkflowExecution,
        run: StepRun,
        completed: &mut HashSet<String>,
        failed: &mut HashSet<String>,
    ) {
        let execution_id = execution.id;
        let state = execution.steps.entry(run.step_id.clone()).or_default();
        state.started_at = Some(run.started_at);
        state.completed_at = Some(run.completed_at);
        state.elapsed_ms = run.elapsed_ms;

        match run.to_result().map_err(|e| e.to_string()) {
            Ok(result) => {
                state.status = StepStatus::Completed;
                state.result = Some(result.payload.clone());
                execution.results.insert(run.step_id.clone(), result);
                execution.completed_steps.push(run.step_id.clone());
                completed.insert(run.step_id.clone());
                tracing::debug!(
                    execution_id = %execution_id,
                    step_id = %run.step_id,
                    elapsed_ms = run.elapsed_ms,
                    "step completed"
                );
                self.events.publish(WorkflowEvent::StepCompleted {
                    execution_id,
                    step_id: run.step_id,
                    elapsed_ms: run.elapsed_ms,
                });
            }
            Err(error) => {
                state.status = StepStatus::Failed;
                state.error = Some(error.clone());
                execution.failed_steps.push(run.step_id.clone());
                failed.insert(run.step_id.clone());
                tracing::warn!(
                    execution_id = %execution_id,
                    step_id = %run.step_id,
                    error = %error,
                    "step failed"
                );
                self.events.publish(WorkflowEvent::StepFailed {
                    execution_id,
                    step_id: run.step_id,
                    error,
                });
            }
        }
    }

    /// Classify steps left over once the frontier is empty.
    fn settle_remaining(
        &self,
        execution: &mut WorkflowExecution,
        graph: &DependencyGraph,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
    ) -> Result<(), EngineError> {
        let blocked = graph.blocked_steps(completed, failed);
        let blocked_ids: HashSet<&str> = blocked.iter().map(|b| b.step_id.as_str()).collect();

        let stuck: Vec<String> = graph
            .step_ids()
            .iter()
            .filter(|id| !completed.contains(*id) && !failed.contains(*id))
            .filter(|id| !blocked_ids.contains(id.as_str()))
            .cloned()
            .collect();
        if !stuck.is_empty() {
            tracing::error!(
                execution_id = %execution.id,
                steps = ?stuck,
                "unresolvable dependencies"
            );
            return Err(EngineError::CircularDependency { steps: stuck });
        }

        for b in blocked {
            if let Some(state) = execution.steps.get_mut(&b.step_id) {
                state.status = StepStatus::Blocked;
                state.error = Some(format!(
                    "blocked by failed dependencies: {}",
                    b.failed_dependencies.join(", ")
                ));
            }
            tracing::info!(
                execution_id = %execution.id,
                step_id = %b.step_id,
                failed_dependencies = ?b.failed_dependencies,
                "step blocked"
            );
            self.events.publish(WorkflowEvent::StepBlocked {
                execution_id: execution.id,
                step_id: b.step_id.clone(),
                failed_dependencies: b.failed_dependencies.clone(),
            });
            execution.blocked_steps.push(b);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::handlers::test_support::{collaborators, query_result};
    use crate::workflow::step_runner::RunnerSettings;
    use insightflow_types::error::WorkflowError;
    use insightflow_types::workflow::{StepDefinition, StepKind, WorkflowTemplate};
    use serde_json::json;

    fn query(id: &str) -> StepDefinition {
        StepDefinition::new(id, StepKind::Query, id).with_param("model", json!("events"))
    }

    fn execution(steps: Vec<StepDefinition>) -> WorkflowExecution {
        WorkflowExecution::new(WorkflowTemplate {
            id: "test".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            steps,
            estimated_duration: String::new(),
            use_cases: vec![],
        })
    }

    fn scheduler(events: &EventBus) -> Scheduler {
        Scheduler::new(
            Arc::new(StepRunner::with_default_handlers(RunnerSettings::default())),
            events.clone(),
        )
    }

    fn collab() -> Collaborators {
        collaborators(query_result(vec![
            json!({"segment": "a", "rate": 0.1}),
            json!({"segment": "b", "rate": 0.3}),
        ]))
    }

    #[tokio::test]
    async fn test_fan_in_waits_for_both_branches() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut exec = execution(vec![
            query("a"),
            query("b"),
            StepDefinition::new("c", StepKind::Comparison, "C")
                .with_param("measure", json!("rate"))
                .with_param("group_by", json!(["segment"]))
                .depends_on(["a", "b"]),
        ]);

        scheduler(&bus)
            .execute(&mut exec, &collab(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        let mut batches = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::BatchDispatched { step_ids, .. } = event {
                batches.push(step_ids);
            }
        }
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(exec.completed_steps.len(), 3);
        assert_eq!(exec.completed_steps[2], "c");
        assert_eq!(exec.results["c"].payload["groups"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_step_blocks_dependents_only() {
        let bus = EventBus::new(64);
        let mut exec = execution(vec![
            StepDefinition::new("a", StepKind::Query, "A"),
            StepDefinition::new("b", StepKind::Aggregation, "B").depends_on(["a"]),
            StepDefinition::new("c", StepKind::Aggregation, "C").depends_on(["b"]),
            query("d"),
        ]);

        scheduler(&bus)
            .execute(&mut exec, &collab(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(exec.completed_steps, vec!["d"]);
        assert_eq!(exec.failed_steps, vec!["a"]);
        let blocked: Vec<_> = exec.blocked_steps.iter().map(|b| b.step_id.as_str()).collect();
        assert_eq!(blocked, vec!["b", "c"]);
        assert_eq!(exec.blocked_steps[1].failed_dependencies, vec!["a"]);
        assert_eq!(exec.steps["c"].status, StepStatus::Blocked);
        assert_eq!(
            exec.steps["a"].error.as_deref(),
            Some("missing required parameter 'model'")
        );
    }

    #[tokio::test]
    async fn test_cycle_detected_at_run_time() {
        let bus = EventBus::new(64);
        let mut exec = execution(vec![
            query("a"),
            StepDefinition::new("x", StepKind::Aggregation, "X").depends_on(["y"]),
            StepDefinition::new("y", StepKind::Aggregation, "Y").depends_on(["x"]),
        ]);

        let err = scheduler(&bus)
            .execute(&mut exec, &collab(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        match err {
            EngineError::CircularDependency { steps } => assert_eq!(steps, vec!["x", "y"]),
            other => panic!("expected CircularDependency, got {other:?}"),
        }
        assert_eq!(exec.completed_steps, vec!["a"]);
    }

    #[tokio::test]
    async fn test_unknown_dependency_rejected_before_dispatch() {
        let bus = EventBus::new(64);
        let mut exec = execution(vec![query("a").depends_on(["ghost"])]);
        let err = scheduler(&bus)
            .execute(&mut exec, &collab(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Workflow(WorkflowError::UnknownDependency { .. })));
        assert_eq!(exec.status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_batch() {
        let bus = EventBus::new(64);
        let mut exec = execution(vec![query("a")]);
        let token = CancellationToken::new();
        token.cancel();

        let err = scheduler(&bus)
            .execute(&mut exec, &collab(), &token, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));
        assert!(exec.completed_steps.is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports_running_step() {
        let bus = EventBus::new(64);
        let mut exec = execution(vec![query("a")]);
        let mut seen_running = Vec::new();

        scheduler(&bus)
            .execute(&mut exec, &collab(), &CancellationToken::new(), |snapshot| {
                seen_running.push(snapshot.current_step().map(String::from));
            })
            .await
            .unwrap();

        assert_eq!(seen_running, vec![Some("a".to_string()), None]);
    }
}
