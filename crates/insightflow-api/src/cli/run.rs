//! `iflow run`: create an execution, run it to completion and print the record.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use insightflow_types::event::WorkflowEvent;
use insightflow_types::workflow::{
    Customization, StepKind, StepStatus, WorkflowExecution, WorkflowTemplate,
};

use crate::sample::sample_collaborators;
use crate::state::AppState;

/// Parse `step.key=value` overrides into a customization.
///
/// The value is read as JSON when it parses (`100`, `true`, `["a","b"]`),
/// otherwise it is kept as a plain string.
pub fn parse_overrides(overrides: &[String]) -> Result<Customization> {
    let mut custom = Customization::default();
    for raw in overrides {
        let (path, value) = raw
            .split_once('=')
            .with_context(|| format!("Override '{raw}' must look like step.key=value"))?;
        let (step, key) = path
            .split_once('.')
            .with_context(|| format!("Override '{raw}' must name a step and a key"))?;
        if step.is_empty() || key.is_empty() {
            bail!("Override '{raw}' must name a step and a key");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        custom = custom.set_param(step, key, value);
    }
    Ok(custom)
}

/// Models queried by the given steps; queries against them will fail.
fn models_to_fail(template: &WorkflowTemplate, fail_steps: &[String]) -> Result<Vec<String>> {
    fail_steps
        .iter()
        .map(|id| {
            let step = template
                .step(id)
                .with_context(|| format!("Step '{id}' not found in template '{}'", template.id))?;
            if step.kind != StepKind::Query {
                bail!("Only query steps can be failed; '{id}' is a {} step", step.kind);
            }
            step.param_str("model")
                .map(str::to_string)
                .with_context(|| format!("Query step '{id}' has no model"))
        })
        .collect()
}

pub async fn handle_run(
    state: &AppState,
    template_id: &str,
    overrides: &[String],
    fail_steps: &[String],
    json: bool,
    quiet: bool,
) -> Result<()> {
    let custom = parse_overrides(overrides)?;
    let engine = &state.engine;
    let execution = engine
        .create_execution(template_id, Some(&custom))
        .with_context(|| format!("Failed to create execution of '{template_id}'"))?;

    let failing = match models_to_fail(&execution.template, fail_steps) {
        Ok(models) => models,
        Err(e) => {
            engine.cancel(execution.id)?;
            return Err(e);
        }
    };
    let collaborators = if failing.is_empty() {
        state.collaborators.clone()
    } else {
        sample_collaborators(state.config(), failing)
    };

    let printer = (!json && !quiet).then(|| {
        println!();
        println!(
            "  {} Running '{}' ({} steps)",
            style("*").green().bold(),
            style(&execution.template.name).cyan(),
            execution.total_steps()
        );
        println!();
        tokio::spawn(print_progress(engine.subscribe(), execution.id))
    });

    let outcome = engine.run(execution.id, &collaborators).await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let finished = outcome.with_context(|| format!("Execution {} did not finish", execution.id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else if !quiet {
        print_summary(&finished);
    }
    Ok(())
}

async fn print_progress(mut rx: broadcast::Receiver<WorkflowEvent>, execution_id: Uuid) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if event.execution_id() != execution_id {
            continue;
        }
        match event {
            WorkflowEvent::StepCompleted { step_id, elapsed_ms, .. } => {
                println!("  {} {step_id} {}", style("✓").green(), style(format!("({elapsed_ms} ms)")).dim());
            }
            WorkflowEvent::StepFailed { step_id, error, .. } => {
                println!("  {} {step_id}: {}", style("✗").red(), style(error).red());
            }
            WorkflowEvent::StepBlocked { step_id, failed_dependencies, .. } => {
                println!(
                    "  {} {step_id} blocked by {}",
                    style("-").yellow(),
                    failed_dependencies.join(", ")
                );
            }
            WorkflowEvent::ExecutionCompleted { .. }
            | WorkflowEvent::ExecutionFailed { .. }
            | WorkflowEvent::ExecutionCancelled { .. } => break,
            _ => {}
        }
    }
}

fn print_summary(execution: &WorkflowExecution) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Status"),
            Cell::new("Elapsed"),
            Cell::new("Error"),
        ]);

    for step in &execution.template.steps {
        let Some(state) = execution.steps.get(&step.id) else {
            continue;
        };
        let color = match state.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            StepStatus::Blocked => Color::Yellow,
            _ => Color::Reset,
        };
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(step.kind),
            Cell::new(state.status).fg(color),
            Cell::new(format!("{} ms", state.elapsed_ms)),
            Cell::new(state.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!("  {}", style("Insights").bold());
    for line in &execution.insights {
        println!("  {} {line}", style("•").cyan());
    }
    println!();
    println!("  Execution ID: {}", style(execution.id).dim());
    println!();
}
