//! Statistical-test step: combine dependency rows and hand them to the tester.
//!
//! Parameters: `comparison_type` (default `difference_in_means`),
//! `dimensions`, `measures`.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use insightflow_types::workflow::StepKind;

use super::stats;
use crate::workflow::step_runner::{StepContext, StepError, StepHandler};

pub const DEFAULT_COMPARISON_TYPE: &str = "difference_in_means";

pub struct StatisticalTestHandler;

impl StepHandler for StatisticalTestHandler {
    fn kind(&self) -> StepKind {
        StepKind::StatisticalTest
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

            let comparison_type = ctx
                .step
                .param_str("comparison_type")
                .unwrap_or(DEFAULT_COMPARISON_TYPE);
            let dimensions = ctx.step.param_strings("dimensions");
            let measures = ctx.step.param_strings("measures");

            let outcome = ctx
                .collaborators
                .tester
                .run_test(&rows, comparison_type, &dimensions, &measures)
                .await?;

            Ok(json!({
                "test_kind": outcome.test_kind,
                "comparison_type": comparison_type,
                "statistic": outcome.statistic,
                "p_value": outcome.p_value,
                "effect_size": outcome.effect_size,
                "significant": outcome.significant,
                "combined_rows": rows.len(),
                "source_steps": sources,
            }))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::handlers::test_support::{Harness, step_result};
    use insightflow_types::workflow::StepDefinition;

    fn steps() -> Vec<StepDefinition> {
        vec![
            StepDefinition::new("a", StepKind::Query, "A"),
            StepDefinition::new("b", StepKind::Query, "B"),
            StepDefinition::new("test", StepKind::StatisticalTest, "Test")
                .with_param("comparison_type", json!("conversion_rate"))
                .depends_on(["a", "b"]),
        ]
    }

    #[tokio::test]
    async fn test_rows_from_all_dependencies_are_combined() {
        let harness = Harness::new(
            steps(),
            vec![
                step_result("a", StepKind::Query, json!({"rows": [{"x": 1}, {"x": 2}]})),
                step_result("b", StepKind::Query, json!({"rows": [{"x": 3}]})),
            ],
        );

        let payload = harness.run(&StatisticalTestHandler, "test").await.unwrap();
        assert_eq!(payload["combined_rows"], json!(3));
        assert_eq!(payload["statistic"], json!(3.0));
        assert_eq!(payload["source_steps"], json!(["a", "b"]));
        assert_eq!(payload["test_kind"], json!("conversion_rate"));
        assert_eq!(payload["significant"], json!(true));
    }

    #[tokio::test]
    async fn test_no_rows_fails() {
        let harness = Harness::new(
            steps(),
            vec![step_result("a", StepKind::Query, json!({"rows": []}))],
        );
        let err = harness.run(&StatisticalTestHandler, "test").await.unwrap_err();
        assert!(matches!(err, StepError::NoUpstreamData(_)));
    }
}
