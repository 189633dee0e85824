//! Deterministic sample collaborators.
//!
//! The `iflow` binary has no data warehouse behind it. These implementations
//! synthesize plausible rows from the query request itself (seeded by a hash
//! of the request, so the same request always yields the same rows), run a
//! Welch t-test over them, and pass findings through unchanged as insight text.

use std::collections::{BTreeMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};

use insightflow_core::collaborator::{
    Collaborators, InsightWriter, QueryBuilder, StatisticalTester,
};
use insightflow_types::analytics::{
    Finding, QueryPlan, QueryRequest, QueryResult, TestOutcome, ValidationReport,
};
use insightflow_types::config::EngineConfig;
use insightflow_types::error::CollaboratorError;

const DEFAULT_ROWS: u64 = 120;
const MAX_ROWS: u64 = 240;
const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Bundle the sample collaborators for one run.
///
/// Queries against any model in `unavailable_models` fail, which is how the
/// CLI simulates a broken upstream step.
pub fn sample_collaborators<I>(config: &EngineConfig, unavailable_models: I) -> Collaborators
where
    I: IntoIterator<Item = String>,
{
    let query = SampleQueryBuilder {
        unavailable_models: unavailable_models.into_iter().collect(),
    };
    Collaborators::new(
        Arc::new(query),
        Arc::new(SampleTester {
            min_sample_size: config.min_sample_size,
        }),
    )
    .with_writer(Arc::new(PassThroughWriter))
}

// ---------------------------------------------------------------------------
// Query builder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SampleQueryBuilder {
    unavailable_models: HashSet<String>,
}

impl QueryBuilder for SampleQueryBuilder {
    fn build(&self, request: &QueryRequest) -> Result<QueryPlan, CollaboratorError> {
        if request.model.trim().is_empty() {
            return Err(CollaboratorError::Query("model name is empty".to_string()));
        }
        Ok(QueryPlan {
            request: request.clone(),
            statement: render_statement(request),
        })
    }

    fn execute<'a>(
        &'a self,
        plan: &'a QueryPlan,
    ) -> BoxFuture<'a, Result<QueryResult, CollaboratorError>> {
        async move {
            let request = &plan.request;
            if self.unavailable_models.contains(&request.model) {
                return Err(CollaboratorError::Unavailable(format!(
                    "sample model '{}' is unavailable",
                    request.model
                )));
            }

            let start = Instant::now();
            let rows = synthesize_rows(request);
            tracing::debug!(model = %request.model, rows = rows.len(), "sample query executed");
            Ok(QueryResult {
                row_count: rows.len(),
                column_count: request.dimensions.len() + request.measures.len(),
                rows,
                elapsed_ms: start.elapsed().as_millis() as u64,
                error: None,
            })
        }
        .boxed()
    }
}

fn render_statement(request: &QueryRequest) -> String {
    let columns: Vec<&str> = request
        .dimensions
        .iter()
        .chain(&request.measures)
        .map(String::as_str)
        .collect();
    let mut statement = format!(
        "SELECT {} FROM {}",
        if columns.is_empty() { "*".to_string() } else { columns.join(", ") },
        request.model
    );
    if !request.filters.is_empty() {
        let clauses: Vec<String> = request
            .filters
            .iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect();
        statement.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
    }
    if !request.dimensions.is_empty() {
        statement.push_str(&format!(" GROUP BY {}", request.dimensions.join(", ")));
    }
    if let Some(limit) = request.limit {
        statement.push_str(&format!(" LIMIT {limit}"));
    }
    statement
}

fn dimension_values(dimension: &str) -> Vec<String> {
    let known: &[&str] = match dimension {
        "segment" => &["enterprise", "mid_market", "smb", "self_serve"],
        "stage" => &["visit", "signup", "activation", "purchase"],
        "feature" => &["dashboards", "exports", "alerts", "api"],
        "plan" => &["starter", "growth", "business", "enterprise"],
        "region" => &["na", "emea", "apac"],
        _ => &[],
    };
    if known.is_empty() {
        (1..=3).map(|i| format!("{dimension}_{i}")).collect()
    } else {
        known.iter().map(|v| v.to_string()).collect()
    }
}

/// Generator seeded from the request, so identical requests yield identical rows.
fn request_rng(request: &QueryRequest) -> StdRng {
    let mut hasher = DefaultHasher::new();
    request.model.hash(&mut hasher);
    request.dimensions.hash(&mut hasher);
    request.measures.hash(&mut hasher);
    Value::Object(request.filters.clone()).to_string().hash(&mut hasher);
    request.limit.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

fn synthesize_rows(request: &QueryRequest) -> Vec<Value> {
    let mut rng = request_rng(request);
    let count = request.limit.unwrap_or(DEFAULT_ROWS).min(MAX_ROWS) as usize;
    let domains: Vec<(String, Vec<String>)> = request
        .dimensions
        .iter()
        .map(|d| (d.clone(), dimension_values(d)))
        .collect();

    (0..count)
        .map(|_| {
            let mut row = Map::new();
            // Later dimension values lift every measure, so groups differ.
            let mut lift = 1.0;
            for (name, values) in &domains {
                let idx = rng.gen_range(0..values.len());
                lift += idx as f64 * 0.12;
                row.insert(name.clone(), json!(values[idx]));
            }
            // Shared per-row intensity keeps count measures correlated.
            let intensity = 0.7 + 0.6 * rng.gen_range(0.0..1.0);
            for measure in &request.measures {
                let value = if measure.contains("rate") {
                    let noise = (rng.gen_range(0.0..1.0) - 0.5) * 0.04;
                    ((0.18 * lift + noise).clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
                } else {
                    (200.0 * lift * intensity * (0.95 + 0.1 * rng.gen_range(0.0..1.0))).round()
                };
                row.insert(measure.clone(), json!(value));
            }
            Value::Object(row)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Statistical tester
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SampleTester {
    pub min_sample_size: usize,
}

fn label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl StatisticalTester for SampleTester {
    fn validate(&self, result: &QueryResult, dimensions: &[String]) -> ValidationReport {
        let mut sample_sizes: BTreeMap<String, usize> = BTreeMap::new();
        for row in &result.rows {
            for dim in dimensions {
                if let Some(value) = row.get(dim) {
                    *sample_sizes.entry(format!("{dim}={}", label(value))).or_default() += 1;
                }
            }
        }

        let mut warnings = Vec::new();
        if result.rows.is_empty() {
            warnings.push("query returned no rows".to_string());
        }
        for (key, count) in &sample_sizes {
            if *count < self.min_sample_size {
                warnings.push(format!(
                    "only {count} rows for {key} (minimum {})",
                    self.min_sample_size
                ));
            }
        }

        ValidationReport {
            valid: warnings.is_empty(),
            warnings,
            sample_sizes: sample_sizes.into_iter().collect(),
        }
    }

    fn run_test<'a>(
        &'a self,
        data: &'a [Value],
        comparison_type: &'a str,
        dimensions: &'a [String],
        measures: &'a [String],
    ) -> BoxFuture<'a, Result<TestOutcome, CollaboratorError>> {
        async move {
            let measure = measures
                .first()
                .cloned()
                .or_else(|| first_numeric_column(data))
                .ok_or_else(|| CollaboratorError::Test("no numeric measure to compare".to_string()))?;
            let (a, b) = split_groups(data, dimensions.first().map(String::as_str), &measure);
            if a.len() < 2 || b.len() < 2 {
                return Err(CollaboratorError::Test(format!(
                    "need at least two '{measure}' values in each group, got {} and {}",
                    a.len(),
                    b.len()
                )));
            }

            let outcome = welch_t_test(&a, &b);
            tracing::debug!(
                comparison_type,
                measure = %measure,
                p_value = outcome.p_value,
                "sample test complete"
            );
            Ok(outcome)
        }
        .boxed()
    }
}

fn first_numeric_column(data: &[Value]) -> Option<String> {
    let row = data.first()?.as_object()?;
    let mut keys: Vec<&String> = row.iter().filter(|(_, v)| v.is_number()).map(|(k, _)| k).collect();
    keys.sort();
    keys.first().map(|k| k.to_string())
}

/// Split rows into the first two distinct values of `dimension`, or into
/// halves when there is no dimension to split on.
fn split_groups(data: &[Value], dimension: Option<&str>, measure: &str) -> (Vec<f64>, Vec<f64>) {
    let value_of = |row: &Value| row.get(measure).and_then(Value::as_f64);

    let Some(dim) = dimension else {
        let values: Vec<f64> = data.iter().filter_map(value_of).collect();
        let mid = values.len() / 2;
        return (values[..mid].to_vec(), values[mid..].to_vec());
    };

    let mut labels: Vec<String> = Vec::new();
    let mut groups: [Vec<f64>; 2] = [Vec::new(), Vec::new()];
    for row in data {
        let (Some(key), Some(v)) = (row.get(dim).map(label), value_of(row)) else {
            continue;
        };
        let idx = match labels.iter().position(|l| *l == key) {
            Some(idx) => idx,
            None if labels.len() < 2 => {
                labels.push(key);
                labels.len() - 1
            }
            None => continue,
        };
        groups[idx].push(v);
    }
    let [a, b] = groups;
    (a, b)
}

fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

fn welch_t_test(a: &[f64], b: &[f64]) -> TestOutcome {
    let (mean_a, var_a) = mean_var(a);
    let (mean_b, var_b) = mean_var(b);
    let se = (var_a / a.len() as f64 + var_b / b.len() as f64).sqrt();
    let (statistic, p_value) = if se > 0.0 {
        let t = (mean_a - mean_b) / se;
        (t, 2.0 * (1.0 - normal_cdf(t.abs())))
    } else {
        (0.0, 1.0)
    };
    let pooled = ((var_a + var_b) / 2.0).sqrt();
    let effect_size = if pooled > 0.0 { (mean_a - mean_b) / pooled } else { 0.0 };

    TestOutcome {
        test_kind: "welch_t_test".to_string(),
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
        effect_size,
        significant: p_value < SIGNIFICANCE_LEVEL,
    }
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation.
fn normal_cdf(x: f64) -> f64 {
    let z = x / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.327_591_1 * z.abs());
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let erf = 1.0 - poly * (-z * z).exp();
    let erf = if z >= 0.0 { erf } else { -erf };
    0.5 * (1.0 + erf)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Uses each finding's built-in summary verbatim.
#[derive(Debug, Default)]
pub struct PassThroughWriter;

impl InsightWriter for PassThroughWriter {
    fn phrase<'a>(
        &'a self,
        findings: &'a [Finding],
    ) -> BoxFuture<'a, Result<Vec<String>, CollaboratorError>> {
        async move { Ok(findings.iter().map(|f| f.summary.clone()).collect()) }.boxed()
    }
}
