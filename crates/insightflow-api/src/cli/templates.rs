//! `iflow templates` subcommands: catalog listing and template detail.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use insightflow_core::workflow::dag::build_execution_plan;
use insightflow_types::workflow::WorkflowTemplate;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum TemplatesCommand {
    /// List catalog templates.
    #[command(alias = "ls")]
    List,

    /// Show a template's steps grouped into dispatch waves.
    Show {
        /// Template ID.
        id: String,
    },
}

pub fn handle_templates_command(cmd: TemplatesCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        TemplatesCommand::List => list_templates(state, json),
        TemplatesCommand::Show { id } => show_template(state, &id, json),
    }
}

fn list_templates(state: &AppState, json: bool) -> Result<()> {
    let templates = state.engine.list_templates();

    if json {
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Steps"),
            Cell::new("Kinds"),
            Cell::new("Est. duration"),
        ]);

    for t in &templates {
        let kinds: Vec<&str> = t.step_kinds.iter().map(|k| k.as_str()).collect();
        table.add_row(vec![
            Cell::new(&t.id),
            Cell::new(&t.name),
            Cell::new(t.step_count),
            Cell::new(kinds.join(", ")),
            Cell::new(&t.estimated_duration),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  Run one with: {}",
        style("iflow run <template-id> [--set step.key=value]").dim()
    );
    println!();
    Ok(())
}

fn show_template(state: &AppState, id: &str, json: bool) -> Result<()> {
    let template = state
        .engine
        .catalog()
        .get(id)
        .with_context(|| format!("Template '{id}' not found. Try `iflow templates list`."))?;

    if json {
        println!("{}", serde_json::to_string_pretty(template)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&template.name).cyan().bold(),
        style(format!("({})", template.id)).dim()
    );
    println!("  {}", template.description);
    if !template.use_cases.is_empty() {
        println!();
        for use_case in &template.use_cases {
            println!("  {} {use_case}", style("?").yellow());
        }
    }
    println!();
    println!("{}", steps_table(template)?);
    println!();
    Ok(())
}

fn steps_table(template: &WorkflowTemplate) -> Result<Table> {
    let waves = build_execution_plan(&template.steps)?;

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Wave").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Kind"),
            Cell::new("Depends on"),
            Cell::new("Parameters"),
        ]);

    for (n, wave) in waves.iter().enumerate() {
        for step in wave {
            let params = serde_json::to_string(&step.parameters)?;
            let deps = if step.depends_on.is_empty() {
                "-".to_string()
            } else {
                step.depends_on.join(", ")
            };
            table.add_row(vec![
                Cell::new(n + 1),
                Cell::new(&step.id),
                Cell::new(step.kind),
                Cell::new(deps),
                Cell::new(params),
            ]);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insightflow_types::config::EngineConfig;

    #[test]
    fn steps_table_lists_every_step() {
        let state = AppState::new(EngineConfig::default());
        let template = state.engine.catalog().get("conversion_analysis").unwrap();
        let table = steps_table(template).unwrap();
        assert_eq!(table.row_iter().count(), template.steps.len());
    }

    #[test]
    fn show_unknown_template_is_an_error() {
        let state = AppState::new(EngineConfig::default());
        let err = show_template(&state, "nope", true).unwrap_err();
        assert!(err.to_string().contains("Template 'nope' not found"));
    }
}
