//! Query step: build and execute a data query, then attach a sample-size check.
//!
//! Parameters: `model` (required), `dimensions`, `measures`, `filters`
//! (object), `limit` (non-negative integer).

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};

use insightflow_types::analytics::QueryRequest;
use insightflow_types::error::CollaboratorError;
use insightflow_types::workflow::{StepDefinition, StepKind};

use crate::workflow::step_runner::{StepContext, StepError, StepHandler};

pub struct QueryHandler;

impl StepHandler for QueryHandler {
    fn kind(&self) -> StepKind {
        StepKind::Query
    }

    fn execute<'a>(&'a self, ctx: StepContext<'a>) -> BoxFuture<'a, Result<Value, StepError>> {
        async move {
            let request = request_from_params(ctx.step)?;
            let query = &ctx.collaborators.query;

            let plan = query.build(&request)?;
            let result = query.execute(&plan).await?;
            if let Some(error) = result.error.clone() {
                return Err(CollaboratorError::Query(error).into());
            }

            let validation = ctx.collaborators.tester.validate(&result, &request.dimensions);
            if !validation.warnings.is_empty() {
                tracing::debug!(
                    step_id = %ctx.step.id,
                    warnings = validation.warnings.len(),
                    "query result has sample-size warnings"
                );
            }

            Ok(json!({
                "query": plan.statement,
                "model": request.model,
                "dimensions": request.dimensions,
                "measures": request.measures,
                "rows": result.rows,
                "row_count": result.row_count,
                "column_count": result.column_count,
                "elapsed_ms": result.elapsed_ms,
                "validation": validation,
            }))
        }
        .boxed()
    }
}

fn request_from_params(step: &StepDefinition) -> Result<QueryRequest, StepError> {
    let model = step
        .param_str("model")
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| StepError::MissingParameter("model".to_string()))?;

    let filters = match step.parameters.get("filters") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(StepError::invalid("filters", "expected an object")),
    };

    let limit = match step.parameters.get("limit") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .ok_or_else(|| StepError::invalid("limit", "expected a non-negative integer"))?,
        ),
    };

    Ok(QueryRequest {
        model: model.to_string(),
        dimensions: step.param_strings("dimensions"),
        measures: step.param_strings("measures"),
        filters,
        limit,
    })
}
