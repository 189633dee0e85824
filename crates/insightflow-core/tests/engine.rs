//! End-to-end engine behavior against scripted collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::{Barrier, Notify, broadcast};

use insightflow_core::collaborator::{Collaborators, QueryBuilder, StatisticalTester};
use insightflow_core::workflow::{EngineError, TemplateCatalog, WorkflowEngine};
use insightflow_types::analytics::{
    QueryPlan, QueryRequest, QueryResult, TestOutcome, ValidationReport,
};
use insightflow_types::config::EngineConfig;
use insightflow_types::error::{CollaboratorError, WorkflowError};
use insightflow_types::event::WorkflowEvent;
use insightflow_types::workflow::{
    Customization, ExecutionStatus, StepDefinition, StepKind, StepOverride, StepStatus,
    WorkflowTemplate,
};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedQuery {
    failing_models: HashSet<String>,
    barrier: Option<Arc<Barrier>>,
    gate: Option<Arc<Notify>>,
}

fn rows_for(request: &QueryRequest) -> Vec<Value> {
    (0..8)
        .map(|i| {
            let mut row = serde_json::Map::new();
            for dim in &request.dimensions {
                row.insert(dim.clone(), json!(format!("{dim}_{}", i % 2)));
            }
            for (m, measure) in request.measures.iter().enumerate() {
                row.insert(measure.clone(), json!((i * (m + 1)) as f64 + 1.0));
            }
            Value::Object(row)
        })
        .collect()
}

impl QueryBuilder for ScriptedQuery {
    fn build(&self, request: &QueryRequest) -> Result<QueryPlan, CollaboratorError> {
        Ok(QueryPlan {
            request: request.clone(),
            statement: format!("SELECT {} FROM {}", request.measures.join(", "), request.model),
        })
    }

    fn execute<'a>(
        &'a self,
        plan: &'a QueryPlan,
    ) -> BoxFuture<'a, Result<QueryResult, CollaboratorError>> {
        async move {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.failing_models.contains(&plan.request.model) {
                return Err(CollaboratorError::Query(format!(
                    "model '{}' unavailable",
                    plan.request.model
                )));
            }
            let rows = rows_for(&plan.request);
            Ok(QueryResult {
                row_count: rows.len(),
                column_count: plan.request.dimensions.len() + plan.request.measures.len(),
                rows,
                elapsed_ms: 2,
                error: None,
            })
        }
        .boxed()
    }
}

struct ScriptedTester;

impl StatisticalTester for ScriptedTester {
    fn validate(&self, result: &QueryResult, _dimensions: &[String]) -> ValidationReport {
        ValidationReport {
            valid: result.row_count >= 5,
            ..ValidationReport::default()
        }
    }

    fn run_test<'a>(
        &'a self,
        data: &'a [Value],
        comparison_type: &'a str,
        _dimensions: &'a [String],
        _measures: &'a [String],
    ) -> BoxFuture<'a, Result<TestOutcome, CollaboratorError>> {
        async move {
            Ok(TestOutcome {
                test_kind: comparison_type.to_string(),
                statistic: 2.5,
                p_value: 0.02,
                effect_size: 0.3,
                significant: data.len() > 3,
            })
        }
        .boxed()
    }
}

fn collaborators(query: ScriptedQuery) -> Collaborators {
    Collaborators::new(Arc::new(query), Arc::new(ScriptedTester))
}

fn template(id: &str, steps: Vec<StepDefinition>) -> WorkflowTemplate {
    WorkflowTemplate {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        steps,
        estimated_duration: "1 minute".to_string(),
        use_cases: vec![],
    }
}

fn query(id: &str, model: &str) -> StepDefinition {
    StepDefinition::new(id, StepKind::Query, id)
        .with_param("model", json!(model))
        .with_param("dimensions", json!(["segment"]))
        .with_param("measures", json!(["rate"]))
}

fn engine_with(templates: Vec<WorkflowTemplate>) -> WorkflowEngine {
    let catalog = TemplateCatalog::new(templates).expect("test templates are valid");
    WorkflowEngine::with_catalog(Arc::new(catalog), EngineConfig::default())
}

fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn cyclic_template_rejected_when_registered() {
    let err = TemplateCatalog::new(vec![template(
        "loop",
        vec![
            query("a", "m").depends_on(["c"]),
            query("b", "m").depends_on(["a"]),
            query("c", "m").depends_on(["b"]),
        ],
    )])
    .unwrap_err();
    match err {
        WorkflowError::CircularDependency { steps } => assert_eq!(steps, vec!["a", "b", "c"]),
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}

#[test]
fn cyclic_customization_rejected_at_creation() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let mut custom = Customization::default();
    custom.steps.insert(
        "funnel_query".to_string(),
        StepOverride {
            depends_on: Some(vec!["significance_test".to_string()]),
            ..StepOverride::default()
        },
    );
    let err = engine
        .create_execution("conversion_analysis", Some(&custom))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Workflow(WorkflowError::CircularDependency { .. })
    ));
    assert_eq!(engine.active_count(), 0);
}

#[tokio::test]
async fn dependents_start_only_after_dependencies_complete() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();
    let exec = engine.create_execution("conversion_analysis", None).unwrap();
    engine
        .run(exec.id, &collaborators(ScriptedQuery::default()))
        .await
        .unwrap();

    let events = drain(&mut rx);
    let mut completed: HashSet<String> = HashSet::new();
    let deps: HashMap<&str, &Vec<String>> = exec
        .template
        .steps
        .iter()
        .map(|s| (s.id.as_str(), &s.depends_on))
        .collect();

    for event in &events {
        match event {
            WorkflowEvent::StepStarted { step_id, .. } => {
                for dep in deps[step_id.as_str()] {
                    assert!(
                        completed.contains(dep),
                        "{step_id} started before {dep} completed"
                    );
                }
            }
            WorkflowEvent::StepCompleted { step_id, .. } => {
                completed.insert(step_id.clone());
            }
            _ => {}
        }
    }
    assert_eq!(completed.len(), 5);
}

#[tokio::test]
async fn failure_is_isolated_and_dependents_are_blocked() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let exec = engine.create_execution("conversion_analysis", None).unwrap();
    let query = ScriptedQuery {
        failing_models: HashSet::from(["conversion_funnel".to_string()]),
        ..ScriptedQuery::default()
    };

    let done = engine.run(exec.id, &collaborators(query)).await.unwrap();

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.failed_steps, vec!["funnel_query"]);
    // segment branch has no path to the failed step
    assert!(done.completed_steps.contains(&"segment_query".to_string()));
    assert!(done.completed_steps.contains(&"segment_comparison".to_string()));

    let blocked: Vec<&str> = done.blocked_steps.iter().map(|b| b.step_id.as_str()).collect();
    assert_eq!(blocked, vec!["significance_test", "conversion_insights"]);
    for b in &done.blocked_steps {
        assert_eq!(b.failed_dependencies, vec!["funnel_query"]);
        assert_eq!(done.steps[&b.step_id].status, StepStatus::Blocked);
        assert!(!done.failed_steps.contains(&b.step_id));
    }
    assert_eq!(
        done.completed_steps.len() + done.failed_steps.len() + done.blocked_steps.len(),
        done.total_steps()
    );
    assert!(done.insights.contains(
        &"Step 'funnel_query' failed: query failed: model 'conversion_funnel' unavailable"
            .to_string()
    ));
}

#[test]
fn customizing_twice_yields_independent_identical_copies() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let before = engine.catalog().get("conversion_analysis").cloned().unwrap();
    let custom = Customization::default().set_param("segment_query", "limit", json!(100));

    let first = engine.create_execution("conversion_analysis", Some(&custom)).unwrap();
    let second = engine.create_execution("conversion_analysis", Some(&custom)).unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.template.steps, second.template.steps);
    assert_eq!(
        first.template.step("segment_query").unwrap().parameters["limit"],
        json!(100)
    );
    assert_eq!(engine.catalog().get("conversion_analysis"), Some(&before));
    assert_eq!(
        before.step("segment_query").unwrap().parameters["limit"],
        json!(500)
    );
}

#[test]
fn list_templates_is_pure() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let first = engine.list_templates();
    let exec = engine.create_execution("revenue_analysis", None).unwrap();
    engine.cancel(exec.id).unwrap();
    assert_eq!(first, engine.list_templates());
    assert_eq!(
        first.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec!["conversion_analysis", "feature_usage_analysis", "revenue_analysis"]
    );
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linear_chain_completes_every_step() {
    let engine = engine_with(vec![template(
        "chain",
        vec![
            query("a", "events"),
            StepDefinition::new("b", StepKind::InsightGeneration, "B").depends_on(["a"]),
            StepDefinition::new("c", StepKind::InsightGeneration, "C").depends_on(["b"]),
            StepDefinition::new("d", StepKind::InsightGeneration, "D").depends_on(["c"]),
            StepDefinition::new("e", StepKind::InsightGeneration, "E").depends_on(["d"]),
        ],
    )]);
    let exec = engine.create_execution("chain", None).unwrap();
    let done = engine
        .run(exec.id, &collaborators(ScriptedQuery::default()))
        .await
        .unwrap();

    assert_eq!(done.completed_steps, vec!["a", "b", "c", "d", "e"]);
    assert!(!done.insights.is_empty());
    assert_eq!(done.insights[0], "Completed 5 of 5 steps (100%)");
    assert!(done.insights.iter().any(|l| l.starts_with("Key finding: ")));
}

#[tokio::test]
async fn independent_steps_share_a_batch() {
    let engine = engine_with(vec![template(
        "fan_in",
        vec![
            query("a", "left"),
            query("b", "right"),
            StepDefinition::new("c", StepKind::StatisticalTest, "C").depends_on(["a", "b"]),
        ],
    )]);
    let mut rx = engine.subscribe();
    let exec = engine.create_execution("fan_in", None).unwrap();
    // Both queries must be in flight at once or the barrier never releases.
    let query = ScriptedQuery {
        barrier: Some(Arc::new(Barrier::new(2))),
        ..ScriptedQuery::default()
    };

    let done = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(exec.id, &collaborators(query)),
    )
    .await
    .expect("a and b should run concurrently")
    .unwrap();

    let batches: Vec<Vec<String>> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkflowEvent::BatchDispatched { step_ids, .. } => Some(step_ids),
            _ => None,
        })
        .collect();
    assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
    assert_eq!(done.results["c"].payload["combined_rows"], json!(16));
}

#[tokio::test]
async fn failed_root_blocks_its_dependent() {
    let engine = engine_with(vec![template(
        "partial",
        vec![
            query("a", "broken"),
            StepDefinition::new("b", StepKind::Aggregation, "B").depends_on(["a"]),
            query("x", "fine"),
            query("y", "fine"),
        ],
    )]);
    let exec = engine.create_execution("partial", None).unwrap();
    let query = ScriptedQuery {
        failing_models: HashSet::from(["broken".to_string()]),
        ..ScriptedQuery::default()
    };

    let done = engine.run(exec.id, &collaborators(query)).await.unwrap();
    assert_eq!(done.completed_steps.len(), 2);
    assert_eq!(done.failed_steps, vec!["a"]);
    assert_eq!(done.blocked_steps.len(), 1);
    assert_eq!(done.blocked_steps[0].step_id, "b");

    let report = engine.status(exec.id).unwrap();
    assert_eq!(report.completed_count, 2);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.blocked_count, 1);
}

#[tokio::test]
async fn cancel_immediately_after_creation() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let exec = engine.create_execution("feature_usage_analysis", None).unwrap();

    let report = engine.cancel(exec.id).unwrap();
    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert_eq!(report.completed_count, 0);
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.status(exec.id).unwrap().status, ExecutionStatus::Cancelled);

    let err = engine
        .run(exec.id, &collaborators(ScriptedQuery::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownExecution(_)));
}

#[tokio::test]
async fn cancel_during_run_discards_results() {
    let engine = Arc::new(WorkflowEngine::new(EngineConfig::default()));
    let mut rx = engine.subscribe();
    let exec = engine.create_execution("revenue_analysis", None).unwrap();
    let gate = Arc::new(Notify::new());
    let query = ScriptedQuery {
        gate: Some(Arc::clone(&gate)),
        ..ScriptedQuery::default()
    };

    let handle = {
        let engine = Arc::clone(&engine);
        let collab = collaborators(query);
        tokio::spawn(async move { engine.run(exec.id, &collab).await })
    };

    // wait for the first step to start
    loop {
        if let WorkflowEvent::StepStarted { .. } = rx.recv().await.unwrap() {
            break;
        }
    }
    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = engine.status(exec.id).unwrap();
            if status.current_step.is_some() {
                return status;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("snapshot should show the running step");
    assert_eq!(status.status, ExecutionStatus::Running);
    assert_eq!(status.current_step.as_deref(), Some("revenue_query"));

    let err = engine
        .run(exec.id, &collaborators(ScriptedQuery::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));

    let report = engine.cancel(exec.id).unwrap();
    assert_eq!(report.status, ExecutionStatus::Cancelled);
    gate.notify_one();

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(EngineError::Cancelled(_))));
    let archived = engine.get_execution(exec.id).unwrap();
    assert_eq!(archived.status, ExecutionStatus::Cancelled);
    assert!(archived.completed_steps.is_empty());
    assert_eq!(engine.history().len(), 1);
}

#[tokio::test]
async fn dropped_run_archives_the_execution() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();
    let exec = engine.create_execution("revenue_analysis", None).unwrap();
    let gate = Arc::new(Notify::new());
    let collab = collaborators(ScriptedQuery {
        gate: Some(Arc::clone(&gate)),
        ..ScriptedQuery::default()
    });

    // the first query never returns, so the caller gives up on the run
    let outcome = tokio::time::timeout(Duration::from_millis(50), engine.run(exec.id, &collab)).await;
    assert!(outcome.is_err());

    assert_eq!(engine.active_count(), 0);
    let status = engine.status(exec.id).unwrap();
    assert_eq!(status.status, ExecutionStatus::Cancelled);
    assert!(status.current_step.is_none());

    let archived = engine.get_execution(exec.id).unwrap();
    assert_eq!(archived.error.as_deref(), Some("run interrupted before completion"));
    assert!(archived.completed_at.is_some());
    assert_eq!(engine.history().len(), 1);
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ExecutionCancelled { .. }))
    );

    let err = engine.run(exec.id, &collab).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownExecution(_)));
}
