//! Payload types exchanged with the external analytics collaborators.
//!
//! The engine never interprets query plans itself; it hands a `QueryRequest`
//! to the query builder, passes the opaque `QueryPlan` back for execution, and
//! consumes the resulting `QueryResult` rows. Statistical and phrasing
//! collaborators exchange `ValidationReport`, `TestOutcome` and `Finding`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inputs for building a data query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Semantic model to query (e.g. "conversion_funnel").
    pub model: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Opaque plan produced by the query builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub request: QueryRequest,
    /// Rendered query text (SQL or similar), for display and auditing.
    pub statement: String,
}

/// Rows and metadata returned by query execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// One JSON object per row.
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub column_count: usize,
    pub elapsed_ms: u64,
    /// Execution error reported by the backend, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lightweight statistical-validity check attached to query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Row counts per dimension value, keyed `"<dimension>=<value>"`.
    #[serde(default)]
    pub sample_sizes: HashMap<String, usize>,
}

/// Outcome of a statistical test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test performed (e.g. "welch_t_test", "chi_square").
    pub test_kind: String,
    pub statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub significant: bool,
}

/// A structured fact distilled from step results, later phrased as an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Step the finding was derived from.
    pub source_step: String,
    /// Topic tag used for focus-area matching (e.g. "conversion", "revenue").
    pub topic: String,
    /// Built-in phrasing, used when no insight writer is configured.
    pub summary: String,
    /// Relative importance; higher sorts first.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}
