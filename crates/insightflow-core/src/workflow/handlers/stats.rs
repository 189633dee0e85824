//! Numeric helpers shared by the derived-analysis handlers.
//!
//! Rows are JSON objects as returned by the query collaborator. Values are
//! numeric when they are JSON numbers or strings that parse as `f64`.

use serde_json::Value;

use crate::workflow::step_runner::StepContext;

/// Numeric value of `field` in a row, if present and numeric.
pub fn numeric(row: &Value, field: &str) -> Option<f64> {
    let value = match row.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Display key for a row's values across `dimensions`, joined by `/`.
pub fn group_key(row: &Value, dimensions: &[String]) -> String {
    dimensions
        .iter()
        .map(|d| match row.get(d) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "(none)".to_string(),
            Some(other) => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Concatenate the `rows` arrays of every declared dependency.
///
/// Returns the combined rows and the IDs of the steps that contributed rows.
pub fn combined_rows(ctx: &StepContext<'_>) -> (Vec<Value>, Vec<String>) {
    let mut rows = Vec::new();
    let mut sources = Vec::new();
    for result in ctx.dependency_results() {
        if let Some(dep_rows) = result.payload.get("rows").and_then(Value::as_array) {
            if !dep_rows.is_empty() {
                rows.extend(dep_rows.iter().cloned());
                sources.push(result.step_id.clone());
            }
        }
    }
    (rows, sources)
}

/// Columns whose every present value is numeric, sorted by name.
pub fn numeric_columns(rows: &[Value]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if !candidates.contains(key) {
                    candidates.push(key.clone());
                }
            }
        }
    }
    candidates.sort();
    candidates.retain(|col| {
        let mut seen = false;
        for row in rows {
            match row.get(col) {
                None | Some(Value::Null) => {}
                Some(_) if numeric(row, col).is_some() => seen = true,
                Some(_) => return false,
            }
        }
        seen
    });
    candidates
}

/// Numeric values of `measure` grouped by `dimensions`, in first-appearance
/// order of each group.
pub fn grouped_values(rows: &[Value], dimensions: &[String], measure: &str) -> Vec<(String, Vec<f64>)> {
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for row in rows {
        let Some(value) = numeric(row, measure) else {
            continue;
        };
        let key = group_key(row, dimensions);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }
    groups
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Linear-interpolated percentile, `p` in `[0, 100]`.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Pearson correlation coefficient. `None` when either series is constant
/// or the series are shorter than two points.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = mean(xs)?;
    let my = mean(ys)?;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// Round for display in payloads.
pub fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
