//! Final pass over a finished execution record, producing summary strings.

use serde_json::Value;

use insightflow_types::workflow::{StepKind, WorkflowExecution};

/// Thresholds for the synthesis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Cumulative step time above which the workflow is called slow.
    pub slow_threshold_ms: u64,
    /// Upper bound on "Key finding" lines copied from insight steps.
    pub max_insights: usize,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 30_000,
            max_insights: 5,
        }
    }
}

/// Summarize completion, failures, blocked steps, timing and key findings.
///
/// Failed steps have no entry in `results`; only the per-step error is read
/// for them.
pub fn synthesize(execution: &WorkflowExecution, options: &SynthesisOptions) -> Vec<String> {
    let total = execution.total_steps();
    let completed = execution.completed_steps.len();
    let pct = if total == 0 {
        0.0
    } else {
        completed as f64 * 100.0 / total as f64
    };

    let mut lines = vec![format!("Completed {completed} of {total} steps ({pct:.0}%)")];

    for step_id in &execution.failed_steps {
        let error = execution
            .steps
            .get(step_id)
            .and_then(|s| s.error.as_deref())
            .unwrap_or("unknown error");
        lines.push(format!("Step '{step_id}' failed: {error}"));
    }

    for blocked in &execution.blocked_steps {
        lines.push(format!(
            "Step '{}' was blocked by failed dependencies: {}",
            blocked.step_id,
            blocked.failed_dependencies.join(", ")
        ));
    }

    let total_ms = execution.total_step_time_ms();
    lines.push(format!("Total step time: {total_ms} ms"));
    if total_ms > options.slow_threshold_ms {
        lines.push(format!(
            "Performance: cumulative step time exceeded {} ms; consider narrowing filters or limits",
            options.slow_threshold_ms
        ));
    } else {
        lines.push("Performance: within expected bounds".to_string());
    }

    let key_findings = execution
        .template
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::InsightGeneration)
        .filter_map(|s| execution.results.get(&s.id))
        .filter_map(|r| r.payload.get("insights").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .take(options.max_insights);
    for finding in key_findings {
        lines.push(format!("Key finding: {finding}"));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use insightflow_types::workflow::{
        BlockedStep, StepDefinition, StepResult, StepStatus, WorkflowTemplate,
    };
    use serde_json::json;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(WorkflowTemplate {
            id: "t".to_string(),
            name: "T".to_string(),
            description: String::new(),
            steps: vec![
                StepDefinition::new("a", StepKind::Query, "A"),
                StepDefinition::new("b", StepKind::Query, "B"),
                StepDefinition::new("c", StepKind::Comparison, "C").depends_on(["b"]),
                StepDefinition::new("d", StepKind::InsightGeneration, "D").depends_on(["a"]),
            ],
            estimated_duration: String::new(),
            use_cases: vec![],
        })
    }

    fn complete(exec: &mut WorkflowExecution, id: &str, elapsed_ms: u64, payload: serde_json::Value) {
        let state = exec.steps.get_mut(id).unwrap();
        state.status = StepStatus::Completed;
        state.elapsed_ms = elapsed_ms;
        exec.completed_steps.push(id.to_string());
        let kind = exec.template.step(id).unwrap().kind;
        exec.results.insert(
            id.to_string(),
            StepResult {
                step_id: id.to_string(),
                kind,
                payload,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                elapsed_ms,
            },
        );
    }

    #[test]
    fn test_partial_failure_summary() {
        let mut exec = execution();
        complete(&mut exec, "a", 100, json!({}));
        complete(&mut exec, "d", 50, json!({"insights": ["Segment B converts 2x"]}));
        {
            let b = exec.steps.get_mut("b").unwrap();
            b.status = StepStatus::Failed;
            b.error = Some("query failed: timeout".to_string());
            b.elapsed_ms = 25;
        }
        exec.failed_steps.push("b".to_string());
        exec.blocked_steps.push(BlockedStep {
            step_id: "c".to_string(),
            failed_dependencies: vec!["b".to_string()],
        });

        let lines = synthesize(&exec, &SynthesisOptions::default());
        assert_eq!(
            lines,
            vec![
                "Completed 2 of 4 steps (50%)",
                "Step 'b' failed: query failed: timeout",
                "Step 'c' was blocked by failed dependencies: b",
                "Total step time: 175 ms",
                "Performance: within expected bounds",
                "Key finding: Segment B converts 2x",
            ]
        );
    }

    #[test]
    fn test_slow_workflow_flagged() {
        let mut exec = execution();
        complete(&mut exec, "a", 600, json!({}));
        let options = SynthesisOptions {
            slow_threshold_ms: 500,
            max_insights: 5,
        };
        let lines = synthesize(&exec, &options);
        assert!(lines[2].starts_with("Performance: cumulative step time exceeded 500 ms"));
    }

    #[test]
    fn test_key_findings_bounded() {
        let mut exec = execution();
        complete(&mut exec, "d", 1, json!({"insights": ["one", "two", "three"]}));
        let options = SynthesisOptions {
            slow_threshold_ms: 30_000,
            max_insights: 2,
        };
        let lines = synthesize(&exec, &options);
        let findings: Vec<_> = lines.iter().filter(|l| l.starts_with("Key finding")).collect();
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_failed_step_missing_from_results_is_tolerated() {
        let mut exec = execution();
        exec.failed_steps.push("ghost".to_string());
        let lines = synthesize(&exec, &SynthesisOptions::default());
        assert_eq!(lines[1], "Step 'ghost' failed: unknown error");
    }
}
