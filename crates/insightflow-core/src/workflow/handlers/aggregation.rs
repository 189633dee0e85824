//! Aggregation step: sum/mean/min/max/count per measure, optionally grouped.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};

use insightflow_types::workflow::StepKind;

use super::stats;
use crate::workflow::step_runner::{StepContext, StepError, StepHandler};

pub struct AggregationHandler;

impl StepHandler for AggregationHandler {
    fn kind(&self) -> StepKind {
        StepKind::Aggregation
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

            let requested = ctx.step.param_strings("measures");
            let measures = if requested.is_empty() {
                stats::numeric_columns(&rows)
            } else {
                requested
            };
            if measures.is_empty() {
                return Err(StepError::invalid("measures", "no numeric columns to aggregate"));
            }

            let group_by = ctx.step.param_strings("group_by");
            let mut payload = json!({
                "row_count": rows.len(),
                "measures": measures,
                "totals": summarize(&rows, &measures),
                "source_steps": sources,
            });

            if !group_by.is_empty() {
                let mut keys: Vec<String> = Vec::new();
                for row in &rows {
                    let key = stats::group_key(row, &group_by);
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                let groups: Vec<Value> = keys
                    .into_iter()
                    .map(|key| {
                        let members: Vec<Value> = rows
                            .iter()
                            .filter(|row| stats::group_key(row, &group_by) == key)
                            .cloned()
                            .collect();
                        json!({
                            "group": key,
                            "row_count": members.len(),
                            "measures": summarize(&members, &measures),
                        })
                    })
                    .collect();
                payload["group_by"] = json!(group_by);
                payload["groups"] = Value::Array(groups);
            }

            Ok(payload)
        }
        .boxed()
    }
}

fn summarize(rows: &[Value], measures: &[String]) -> Value {
    let mut out = Map::new();
    for measure in measures {
        let values: Vec<f64> = rows.iter().filter_map(|r| stats::numeric(r, measure)).collect();
        let entry = if values.is_empty() {
            json!({ "count": 0 })
        } else {
            let sum: f64 = values.iter().sum();
            json!({
                "sum": sum,
                "mean": stats::mean(&values).map(|m| stats::round(m, 4)),
                "min": values.iter().copied().fold(f64::INFINITY, f64::min),
                "max": values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                "count": values.len(),
            })
        };
        out.insert(measure.clone(), entry);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::handlers::test_support::{Harness, step_result};
    use insightflow_types::workflow::StepDefinition;

    fn harness(rollup: StepDefinition) -> Harness {
        Harness::new(
            vec![StepDefinition::new("revenue", StepKind::Query, "Revenue"), rollup],
            vec![step_result(
                "revenue",
                StepKind::Query,
                json!({"rows": [
                    {"plan": "pro", "mrr": 100, "seats": 5},
                    {"plan": "pro", "mrr": 300, "seats": 15},
                    {"plan": "team", "mrr": 50, "seats": 2},
                ]}),
            )],
        )
    }

    #[tokio::test]
    async fn test_totals_over_numeric_columns() {
        let h = harness(
            StepDefinition::new("rollup", StepKind::Aggregation, "Rollup").depends_on(["revenue"]),
        );
        let payload = h.run(&AggregationHandler, "rollup").await.unwrap();
        assert_eq!(payload["measures"], json!(["mrr", "seats"]));
        assert_eq!(payload["totals"]["mrr"]["sum"], json!(450.0));
        assert_eq!(payload["totals"]["mrr"]["mean"], json!(150.0));
        assert_eq!(payload["totals"]["mrr"]["min"], json!(50.0));
        assert_eq!(payload["totals"]["seats"]["count"], json!(3));
        assert!(payload.get("groups").is_none());
    }

    #[tokio::test]
    async fn test_grouped_rollup() {
        let h = harness(
            StepDefinition::new("rollup", StepKind::Aggregation, "Rollup")
                .with_param("measures", json!(["mrr"]))
                .with_param("group_by", json!(["plan"]))
                .depends_on(["revenue"]),
        );
        let payload = h.run(&AggregationHandler, "rollup").await.unwrap();
        let groups = payload["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["group"], json!("pro"));
        assert_eq!(groups[0]["measures"]["mrr"]["sum"], json!(400.0));
        assert_eq!(groups[1]["row_count"], json!(1));
    }
}
