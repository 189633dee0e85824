//! Insight generation: turn every ancestor's result into structured findings,
//! rank them, and phrase a bounded list of insight strings.
//!
//! Findings whose topic, source step or summary mention one of the step's
//! `focus_areas` rank ahead of the rest; within each group, higher weight
//! first. The list is cut to `max_insights` before phrasing. Phrasing goes
//! through the optional `InsightWriter`; when it is absent, fails, or returns
//! nothing, each finding's built-in summary is used.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use insightflow_types::analytics::Finding;
use insightflow_types::workflow::{StepKind, StepResult};

use crate::workflow::step_runner::{StepContext, StepError, StepHandler};

pub struct InsightHandler;

impl StepHandler for InsightHandler {
    fn kind(&self) -> StepKind {
        StepKind::InsightGeneration
    }

    fn execute<'a>(&'a self, ctx: StepContext<'a>) -> BoxFuture<'a, Result<Value, StepError>> {
        async move {
            let ancestors: Vec<&StepResult> = ctx
                .graph
                .ancestors_of(&ctx.step.id)
                .iter()
                .filter_map(|id| ctx.upstream.get(id))
                .collect();
            if ancestors.is_empty() {
                return Err(StepError::NoUpstreamData(format!(
                    "insight step '{}' has no upstream results",
                    ctx.step.id
                )));
            }

            let focus_areas = ctx.step.param_strings("focus_areas");
            let max_insights = ctx
                .step
                .param_u64("max_insights")
                .map(|n| n as usize)
                .unwrap_or(ctx.settings.max_insights);

            let mut findings: Vec<Finding> =
                ancestors.iter().flat_map(|r| derive_findings(r)).collect();
            prioritize(&mut findings, &focus_areas);
            findings.truncate(max_insights);

            let (insights, phrased_by) = phrase(&ctx, &findings).await;

            Ok(json!({
                "insights": insights,
                "findings": findings,
                "phrased_by": phrased_by,
                "focus_areas": focus_areas,
                "sources": ancestors.iter().map(|r| r.step_id.as_str()).collect::<Vec<_>>(),
            }))
        }
        .boxed()
    }
}

async fn phrase(ctx: &StepContext<'_>, findings: &[Finding]) -> (Vec<String>, &'static str) {
    let builtin = || findings.iter().map(|f| f.summary.clone()).collect::<Vec<_>>();
    if findings.is_empty() {
        return (Vec::new(), "builtin");
    }
    let Some(writer) = ctx.collaborators.writer.as_ref() else {
        return (builtin(), "builtin");
    };

    match writer.phrase(findings).await {
        Ok(lines) if !lines.is_empty() => {
            let mut lines = lines;
            lines.truncate(findings.len());
            (lines, "writer")
        }
        Ok(_) => (builtin(), "builtin"),
        Err(e) => {
            tracing::warn!(step_id = %ctx.step.id, error = %e, "insight writer failed, using built-in phrasing");
            (builtin(), "builtin")
        }
    }
}

fn matches_focus(finding: &Finding, focus_areas: &[String]) -> bool {
    let haystack = format!(
        "{} {} {}",
        finding.topic, finding.source_step, finding.summary
    )
    .to_lowercase();
    focus_areas
        .iter()
        .any(|area| haystack.contains(&area.to_lowercase()))
}

/// Focus-area matches first, then by descending weight. Stable.
fn prioritize(findings: &mut [Finding], focus_areas: &[String]) {
    findings.sort_by(|a, b| {
        let fa = matches_focus(a, focus_areas);
        let fb = matches_focus(b, focus_areas);
        fb.cmp(&fa).then(b.weight.total_cmp(&a.weight))
    });
}

fn topic_of(result: &StepResult) -> String {
    result
        .payload
        .get("model")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| result.step_id.clone())
}

fn finding(result: &StepResult, summary: String, weight: f64, detail: Value) -> Finding {
    Finding {
        source_step: result.step_id.clone(),
        topic: topic_of(result),
        summary,
        weight,
        detail,
    }
}

fn derive_findings(result: &StepResult) -> Vec<Finding> {
    let p = &result.payload;
    let mut out = Vec::new();

    match result.kind {
        StepKind::Query => {
            let rows = p["row_count"].as_u64().unwrap_or(0);
            out.push(finding(
                result,
                format!("Query '{}' returned {rows} rows", result.step_id),
                0.2,
                Value::Null,
            ));
            if let Some(warnings) = p["validation"]["warnings"].as_array() {
                for w in warnings.iter().filter_map(Value::as_str) {
                    out.push(finding(
                        result,
                        format!("Data quality warning in '{}': {w}", result.step_id),
                        0.6,
                        Value::Null,
                    ));
                }
            }
        }
        StepKind::StatisticalTest => {
            let test = p["test_kind"].as_str().unwrap_or("statistical test");
            let p_value = p["p_value"].as_f64().unwrap_or(1.0);
            let effect = p["effect_size"].as_f64().unwrap_or(0.0);
            if p["significant"].as_bool().unwrap_or(false) {
                out.push(finding(
                    result,
                    format!(
                        "Significant difference detected by {test} (p = {p_value:.4}, effect size {effect:.2})"
                    ),
                    1.0 + effect.abs().min(1.0),
                    json!({"p_value": p_value, "effect_size": effect}),
                ));
            } else {
                out.push(finding(
                    result,
                    format!("No significant difference detected by {test} (p = {p_value:.4})"),
                    0.4,
                    json!({"p_value": p_value}),
                ));
            }
        }
        StepKind::Analysis => {
            if let Some(pairs) = p["strong_correlations"].as_array() {
                for pair in pairs {
                    let r = pair["r"].as_f64().unwrap_or(0.0);
                    out.push(finding(
                        result,
                        format!(
                            "Strong {} correlation between {} and {} (r = {r:.2})",
                            pair["direction"].as_str().unwrap_or("linear"),
                            pair["a"].as_str().unwrap_or("?"),
                            pair["b"].as_str().unwrap_or("?"),
                        ),
                        0.5 + r.abs() / 2.0,
                        pair.clone(),
                    ));
                }
            }
            if let Some(opps) = p["opportunities"].as_array() {
                let measure = p["measure"].as_str().unwrap_or("value");
                for opp in opps {
                    let lift = opp["lift"].as_f64().unwrap_or(0.0);
                    out.push(finding(
                        result,
                        format!(
                            "Expansion opportunity: {} averages {:.2} {measure}, {:+.0}% versus overall",
                            opp["group"].as_str().unwrap_or("?"),
                            opp["mean"].as_f64().unwrap_or(0.0),
                            lift * 100.0,
                        ),
                        0.7 + lift.clamp(0.0, 1.0) / 4.0,
                        opp.clone(),
                    ));
                }
            }
        }
        StepKind::Comparison => {
            let measure = p["measure"].as_str().unwrap_or("value");
            if p["notable"].as_bool().unwrap_or(false) {
                let spread = p["relative_spread"]
                    .as_f64()
                    .map(|s| format!(" by {:.1}%", s * 100.0))
                    .unwrap_or_default();
                out.push(finding(
                    result,
                    format!(
                        "{} leads {} on {measure}{spread}",
                        p["highest"].as_str().unwrap_or("?"),
                        p["lowest"].as_str().unwrap_or("?"),
                    ),
                    0.8,
                    Value::Null,
                ));
            } else {
                out.push(finding(
                    result,
                    format!("{measure} is consistent across groups in '{}'", result.step_id),
                    0.3,
                    Value::Null,
                ));
            }
        }
        StepKind::Aggregation => {
            if let Some(totals) = p["totals"].as_object() {
                for (measure, t) in totals {
                    if let Some(sum) = t["sum"].as_f64() {
                        out.push(finding(
                            result,
                            format!(
                                "Total {measure}: {sum:.2} across {} rows",
                                t["count"].as_u64().unwrap_or(0)
                            ),
                            0.3,
                            Value::Null,
                        ));
                    }
                }
            }
        }
        StepKind::InsightGeneration => {}
    }

    out
}
