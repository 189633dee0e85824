//! Derived analysis over dependency rows. No new data is fetched.
//!
//! `analysis_type`:
//! - `correlation` (default): Pearson r for every pair of numeric columns.
//!   A pair is strong when `|r| >= 2/sqrt(n)` (roughly the 95% critical value)
//!   once `n >= min_samples`; below that `fallback_threshold` (0.5) applies.
//! - `expansion_opportunities`: mean of `measure` per `group_by` group. With
//!   at least `min_groups` (4) groups, groups at or above the 75th percentile
//!   of group means are flagged; otherwise groups above the overall mean.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use insightflow_types::workflow::StepKind;

use super::stats;
use crate::workflow::step_runner::{StepContext, StepError, StepHandler};

pub const DEFAULT_FALLBACK_CORRELATION: f64 = 0.5;
pub const DEFAULT_MIN_GROUPS: usize = 4;
const MIN_PAIRED_POINTS: usize = 3;

pub struct AnalysisHandler;

impl StepHandler for AnalysisHandler {
    fn kind(&self) -> StepKind {
        StepKind::Analysis
    }

    fn execute<'a>(&'a self, ctx: StepContext<'a>) -> BoxFuture<'a, Result<Value, StepError>> {
        async move {
            let (rows, sources) = stats::combined_rows(&ctx);
            if rows.is_empty() {
                return Err(StepError::NoUpstreamData(format!(
                    "no rows from dependencies of '{}'",
                    ctx.step.id
                )));
            }

            let mut payload = match ctx.step.param_str("analysis_type").unwrap_or("correlation") {
                "correlation" => correlation(&ctx, &rows),
                "expansion_opportunities" => expansion_opportunities(&ctx, &rows)?,
                other => {
                    return Err(StepError::invalid(
                        "analysis_type",
                        format!("unsupported analysis '{other}'"),
                    ));
                }
            };
            payload["sample_size"] = json!(rows.len());
            payload["source_steps"] = json!(sources);
            Ok(payload)
        }
        .boxed()
    }
}

fn correlation(ctx: &StepContext<'_>, rows: &[Value]) -> Value {
    let requested = ctx.step.param_strings("measures");
    let columns = if requested.is_empty() {
        stats::numeric_columns(rows)
    } else {
        requested
    };
    let min_samples = ctx.min_samples();
    let fallback = ctx
        .step
        .param_f64("fallback_threshold")
        .unwrap_or(DEFAULT_FALLBACK_CORRELATION);

    let mut pairs_tested = 0usize;
    let mut strong: Vec<(f64, Value)> = Vec::new();

    for (i, a) in columns.iter().enumerate() {
        for b in &columns[i + 1..] {
            let (xs, ys): (Vec<f64>, Vec<f64>) = rows
                .iter()
                .filter_map(|row| Some((stats::numeric(row, a)?, stats::numeric(row, b)?)))
                .unzip();
            let n = xs.len();
            if n < MIN_PAIRED_POINTS {
                continue;
            }
            let Some(r) = stats::pearson(&xs, &ys) else {
                continue;
            };
            pairs_tested += 1;

            let threshold = if n >= min_samples {
                2.0 / (n as f64).sqrt()
            } else {
                fallback
            };
            if r.abs() >= threshold {
                strong.push((
                    r.abs(),
                    json!({
                        "a": a,
                        "b": b,
                        "r": stats::round(r, 4),
                        "n": n,
                        "threshold": stats::round(threshold, 4),
                        "direction": if r >= 0.0 { "positive" } else { "negative" },
                    }),
                ));
            }
        }
    }

    strong.sort_by(|x, y| y.0.total_cmp(&x.0));
    json!({
        "analysis_type": "correlation",
        "columns": columns,
        "pairs_tested": pairs_tested,
        "strong_correlations": strong.into_iter().map(|(_, v)| v).collect::<Vec<_>>(),
    })
}

fn expansion_opportunities(ctx: &StepContext<'_>, rows: &[Value]) -> Result<Value, StepError> {
    let measure = ctx
        .step
        .param_str("measure")
        .ok_or_else(|| StepError::MissingParameter("measure".to_string()))?;
    let group_by = ctx.step.param_strings("group_by");
    if group_by.is_empty() {
        return Err(StepError::MissingParameter("group_by".to_string()));
    }
    let min_groups = ctx
        .step
        .param_u64("min_groups")
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MIN_GROUPS);

    let groups = stats::grouped_values(rows, &group_by, measure);
    if groups.is_empty() {
        return Err(StepError::NoUpstreamData(format!(
            "no numeric values for measure '{measure}'"
        )));
    }

    let all: Vec<f64> = groups.iter().flat_map(|(_, v)| v.iter().copied()).collect();
    let overall = stats::mean(&all).unwrap_or(0.0);
    let means: Vec<(String, f64, usize)> = groups
        .iter()
        .filter_map(|(key, values)| Some((key.clone(), stats::mean(values)?, values.len())))
        .collect();

    let group_means: Vec<f64> = means.iter().map(|(_, m, _)| *m).collect();
    let (method, threshold) = if means.len() >= min_groups {
        ("percentile_75", stats::percentile(&group_means, 75.0).unwrap_or(overall))
    } else {
        ("above_mean", overall)
    };

    let flagged = |m: f64| {
        if method == "percentile_75" {
            m >= threshold
        } else {
            m > threshold
        }
    };

    let mut opportunities: Vec<Value> = means
        .iter()
        .filter(|(_, m, _)| flagged(*m))
        .map(|(key, m, count)| {
            let lift = if overall != 0.0 { m / overall - 1.0 } else { 0.0 };
            json!({
                "group": key,
                "mean": stats::round(*m, 4),
                "count": count,
                "lift": stats::round(lift, 4),
            })
        })
        .collect();
    opportunities.sort_by(|x, y| {
        let mx = x["mean"].as_f64().unwrap_or(0.0);
        let my = y["mean"].as_f64().unwrap_or(0.0);
        my.total_cmp(&mx)
    });

    Ok(json!({
        "analysis_type": "expansion_opportunities",
        "measure": measure,
        "group_by": group_by,
        "method": method,
        "threshold": stats::round(threshold, 4),
        "overall_mean": stats::round(overall, 4),
        "groups": means
            .iter()
            .map(|(key, m, count)| json!({"group": key, "mean": stats::round(*m, 4), "count": count}))
            .collect::<Vec<_>>(),
        "opportunities": opportunities,
    }))
}
