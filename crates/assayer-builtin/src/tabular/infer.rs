//! Column type inference.

use assayer::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred (or required) type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    Boolean,
    Date,
    String,
}

impl FieldType {
    /// Candidates from most to least specific.
    const CANDIDATES: [FieldType; 4] = [
        FieldType::Integer,
        FieldType::Number,
        FieldType::Boolean,
        FieldType::Date,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::String => "string",
        }
    }

    /// Whether a non-empty cell is a valid value of this type.
    pub fn accepts(&self, cell: &str) -> bool {
        let cell = cell.trim();
        match self {
            FieldType::Integer => cell.parse::<i64>().is_ok(),
            FieldType::Number => parse_number(cell).is_some(),
            FieldType::Boolean => parse_bool(cell).is_some(),
            FieldType::Date => NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok(),
            FieldType::String => true,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Number)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finite number in `cell`, if any.
pub fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub fn is_null(cell: &str) -> bool {
    cell.trim().is_empty()
}

/// Most specific type accepting every non-empty cell. Columns with no values
/// are strings.
pub fn infer_column<'a>(cells: impl Iterator<Item = &'a str>) -> FieldType {
    let mut candidates = FieldType::CANDIDATES.to_vec();
    let mut seen = false;
    for cell in cells.filter(|c| !is_null(c)) {
        seen = true;
        candidates.retain(|t| t.accepts(cell));
        if candidates.is_empty() {
            return FieldType::String;
        }
    }
    match candidates.first() {
        Some(field_type) if seen => *field_type,
        _ => FieldType::String,
    }
}

/// Inferred type of every column, in header order.
pub fn infer_table(table: &Table) -> Vec<(String, FieldType)> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), infer_column(table.column(i))))
        .collect()
}
