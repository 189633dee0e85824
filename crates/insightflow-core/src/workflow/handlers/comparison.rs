//! Cross-group comparison of one measure over dependency rows.
//!
//! The spread between the highest and lowest group mean, relative to the
//! lowest, is `notable` when it exceeds the coefficient of variation of all
//! values (once there are `min_samples` values), else `fallback_threshold`.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use insightflow_types::workflow::StepKind;

use super::stats;
use crate::workflow::step_runner::{StepContext, StepError, StepHandler};

pub const DEFAULT_FALLBACK_SPREAD: f64 = 0.1;

pub struct ComparisonHandler;

struct GroupStats {
    key: String,
    count: usize,
    mean: f64,
    min: f64,
    max: f64,
}

impl StepHandler for ComparisonHandler {
    fn kind(&self) -> StepKind {
        StepKind::Comparison
    }

    fn execute<'a>(&'a self, ctx: StepContext<'a>) -> BoxFuture<'a, Result<Value, StepError>> {
        async move {
            let measure = ctx
                .step
                .param_str("measure")
                .ok_or_else(|| StepError::MissingParameter("measure".to_string()))?;
            let group_by = ctx.step.param_strings("group_by");
            if group_by.is_empty() {
                return Err(StepError::MissingParameter("group_by".to_string()));
            }

            let (rows, sources) = stats::combined_rows(&ctx);
            let groups: Vec<GroupStats> = stats::grouped_values(&rows, &group_by, measure)
                .into_iter()
                .filter_map(|(key, values)| {
                    Some(GroupStats {
                        count: values.len(),
                        mean: stats::mean(&values)?,
                        min: values.iter().copied().fold(f64::INFINITY, f64::min),
                        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                        key,
                    })
                })
                .collect();
            if groups.is_empty() {
                return Err(StepError::NoUpstreamData(format!(
                    "no numeric values for measure '{measure}' in dependencies of '{}'",
                    ctx.step.id
                )));
            }

            let all: Vec<f64> = stats::grouped_values(&rows, &[], measure)
                .into_iter()
                .flat_map(|(_, v)| v)
                .collect();
            let fallback = ctx
                .step
                .param_f64("fallback_threshold")
                .unwrap_or(DEFAULT_FALLBACK_SPREAD);
            let (threshold, threshold_source) = if all.len() >= ctx.min_samples() {
                match (stats::mean(&all), stats::std_dev(&all)) {
                    (Some(m), Some(sd)) if m != 0.0 => (sd / m.abs(), "coefficient_of_variation"),
                    _ => (fallback, "fallback"),
                }
            } else {
                (fallback, "fallback")
            };

            let highest = groups.iter().max_by(|a, b| a.mean.total_cmp(&b.mean));
            let lowest = groups.iter().min_by(|a, b| a.mean.total_cmp(&b.mean));
            let (spread, notable) = match (highest, lowest) {
                (Some(h), Some(l)) if groups.len() > 1 => {
                    if l.mean != 0.0 {
                        let spread = (h.mean - l.mean) / l.mean.abs();
                        (Some(spread), spread > threshold)
                    } else {
                        (None, h.mean > l.mean)
                    }
                }
                _ => (None, false),
            };

            Ok(json!({
                "measure": measure,
                "group_by": group_by,
                "groups": groups
                    .iter()
                    .map(|g| json!({
                        "group": g.key,
                        "count": g.count,
                        "mean": stats::round(g.mean, 4),
                        "min": g.min,
                        "max": g.max,
                    }))
                    .collect::<Vec<_>>(),
                "highest": highest.map(|g| g.key.clone()),
                "lowest": lowest.map(|g| g.key.clone()),
                "relative_spread": spread.map(|s| stats::round(s, 4)),
                "threshold": stats::round(threshold, 4),
                "threshold_source": threshold_source,
                "notable": notable,
                "sample_size": all.len(),
                "source_steps": sources,
            }))
        }
        .boxed()
    }
}
