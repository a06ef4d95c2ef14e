//! In-memory aggregation helpers for statistics tools and resources.
//!
//! Statistics are computed over a full unfiltered read; no database-side
//! aggregation is assumed.

use serde_json::{Map, Value};

use crate::store::Row;

/// Grouped counts by the string value of `field`. Rows with a missing or
/// null value land in the "unknown" bucket.
pub fn count_by(rows: &[Row], field: &str) -> Map<String, Value> {
    let mut counts: Map<String, Value> = Map::new();
    for row in rows {
        let key = match row.get(field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "unknown".to_string(),
        };
        let count = counts.get(&key).and_then(Value::as_u64).unwrap_or(0);
        counts.insert(key, Value::from(count + 1));
    }
    counts
}

/// Sum of the numeric values of `field`, ignoring rows without one.
pub fn sum(rows: &[Row], field: &str) -> f64 {
    rows.iter()
        .filter_map(|row| row.get(field).and_then(Value::as_f64))
        .sum()
}

/// Mean of the numeric values of `field`; `None` when no row carries one.
pub fn average(rows: &[Row], field: &str) -> Option<f64> {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(field).and_then(Value::as_f64))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
