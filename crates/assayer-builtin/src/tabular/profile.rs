//! Table profiles and single-value metrics.

use super::infer::{infer_column, is_null, parse_number};
use assayer::{Metric, PluginError, Table};
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::collections::HashSet;

/// Table-level statistics and a summary per column.
pub fn profile(table: &Table) -> (Value, IndexMap<String, Value>) {
    let stats = json!({
        "rows": table.row_count(),
        "columns": table.column_count(),
        "duplicate_rows": duplicate_rows(table),
    });

    let mut fields = IndexMap::new();
    for (i, name) in table.headers.iter().enumerate() {
        let field_type = infer_column(table.column(i));
        let mut summary = json!({
            "type": field_type,
            "nulls": null_count(table, i),
            "distinct": distinct_count(table, i),
        });
        if field_type.is_numeric() {
            let numbers: Vec<f64> = table.column(i).filter_map(parse_number).collect();
            summary["min"] = json!(numbers.iter().copied().reduce(f64::min));
            summary["max"] = json!(numbers.iter().copied().reduce(f64::max));
            summary["mean"] = json!(mean_of(&numbers));
        }
        fields.insert(name.clone(), summary);
    }
    (stats, fields)
}

/// Value of `metric` over `table`.
pub fn measure(table: &Table, metric: &Metric) -> Result<Value, PluginError> {
    let column = || -> Result<usize, PluginError> {
        let name = metric.params.get("column").and_then(Value::as_str).ok_or_else(|| {
            PluginError::InvalidParams(format!("metric '{}' needs a 'column' param", metric.name))
        })?;
        table
            .column_index(name)
            .ok_or_else(|| PluginError::Failed(format!("missing column '{name}'")))
    };

    let value = match metric.metric.as_str() {
        "row_count" => json!(table.row_count()),
        "column_count" => json!(table.column_count()),
        "null_count" => {
            if metric.params.get("column").is_some() {
                json!(null_count(table, column()?))
            } else {
                json!((0..table.column_count()).map(|i| null_count(table, i)).sum::<usize>())
            }
        }
        "distinct_count" => json!(distinct_count(table, column()?)),
        "mean" => {
            let index = column()?;
            let mut numbers = Vec::new();
            for cell in table.column(index).filter(|c| !is_null(c)) {
                let n = parse_number(cell).ok_or_else(|| {
                    PluginError::Failed(format!("non-numeric value '{cell}' in mean"))
                })?;
                numbers.push(n);
            }
            json!(mean_of(&numbers))
        }
        "duplicate_rows" => json!(duplicate_rows(table)),
        other => {
            return Err(PluginError::InvalidParams(format!(
                "unknown tabular metric '{other}'"
            )));
        }
    };
    Ok(value)
}

fn null_count(table: &Table, index: usize) -> usize {
    table.column(index).filter(|c| is_null(c)).count()
}

fn distinct_count(table: &Table, index: usize) -> usize {
    table
        .column(index)
        .filter(|c| !is_null(c))
        .collect::<HashSet<_>>()
        .len()
}

/// Rows identical to an earlier row.
fn duplicate_rows(table: &Table) -> usize {
    let mut seen = HashSet::new();
    table.rows.iter().filter(|row| !seen.insert(*row)).count()
}

fn mean_of(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        None
    } else {
        Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
    }
}
