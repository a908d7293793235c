//! Column checks for `tabular` constraints.
//!
//! A constraint's `check` object combines any of the rules below. Column rules
//! need `column`; `columns` checks the header.
//!
//! ```yaml
//! check:
//!   column: total
//!   type: number
//!   required: true
//!   minimum: 0
//! ```

use super::infer::{FieldType, is_null, parse_number};
use assayer::{PluginError, Table};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Check {
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default, rename = "enum")]
    pub allowed: Option<Vec<String>>,
    /// Columns the header must contain.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Check {
    pub fn from_value(value: &Value) -> Result<Self, PluginError> {
        let check: Check = serde_json::from_value(value.clone())
            .map_err(|e| PluginError::InvalidParams(format!("tabular check: {e}")))?;
        if check.column.is_none() && check.has_column_rules() {
            return Err(PluginError::InvalidParams(
                "tabular check: column rules need 'column'".into(),
            ));
        }
        if check.column.is_none() && check.columns.is_none() {
            return Err(PluginError::InvalidParams(
                "tabular check: nothing to check".into(),
            ));
        }
        Ok(check)
    }

    fn has_column_rules(&self) -> bool {
        self.field_type.is_some()
            || self.required
            || self.unique
            || self.minimum.is_some()
            || self.maximum.is_some()
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.allowed.is_some()
    }

    /// Every violation in `table`, in row order. Rows are numbered from 1,
    /// excluding the header.
    pub fn evaluate(&self, table: &Table) -> Vec<Value> {
        let mut records = Vec::new();

        if let Some(columns) = &self.columns {
            for column in columns {
                if table.column_index(column).is_none() {
                    records.push(json!({ "rule": "columns", "column": column }));
                }
            }
        }

        let Some(column) = &self.column else {
            return records;
        };
        let Some(index) = table.column_index(column) else {
            records.push(json!({
                "rule": "column",
                "column": column,
                "message": "missing column",
            }));
            return records;
        };

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, cell) in table.column(index).enumerate() {
            let row = i + 1;
            let mut violate = |rule: &str| {
                records.push(json!({ "row": row, "column": column, "value": cell, "rule": rule }));
            };

            if is_null(cell) {
                if self.required {
                    violate("required");
                }
                continue;
            }
            if let Some(field_type) = self.field_type {
                if !field_type.accepts(cell) {
                    violate("type");
                }
            }
            if self.minimum.is_some() || self.maximum.is_some() {
                match parse_number(cell) {
                    Some(n) => {
                        if self.minimum.is_some_and(|min| n < min) {
                            violate("minimum");
                        }
                        if self.maximum.is_some_and(|max| n > max) {
                            violate("maximum");
                        }
                    }
                    None => violate("number"),
                }
            }
            let length = cell.chars().count();
            if self.min_length.is_some_and(|min| length < min) {
                violate("min_length");
            }
            if self.max_length.is_some_and(|max| length > max) {
                violate("max_length");
            }
            if let Some(allowed) = &self.allowed {
                if !allowed.iter().any(|a| a == cell) {
                    violate("enum");
                }
            }
            if self.unique {
                if let Some(first) = seen.get(cell) {
                    records.push(json!({
                        "row": row,
                        "column": column,
                        "value": cell,
                        "rule": "unique",
                        "first_row": first,
                    }));
                } else {
                    seen.insert(cell, row);
                }
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let rows = [
            ["1", "ada", "9.5", "open"],
            ["2", "", "12", "closed"],
            ["2", "grace", "-1", "lost"],
            ["x", "linus torvalds", "abc", "open"],
        ];
        Table::new(
            vec!["id".into(), "customer".into(), "total".into(), "state".into()],
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn rules(records: &[Value]) -> Vec<(u64, &str)> {
        records
            .iter()
            .map(|r| (r["row"].as_u64().unwrap_or(0), r["rule"].as_str().unwrap()))
            .collect()
    }

    fn check(value: Value) -> Check {
        Check::from_value(&value).unwrap()
    }

    #[test]
    fn test_type_and_unique() {
        let records = check(json!({"column": "id", "type": "integer", "unique": true}))
            .evaluate(&table());
        assert_eq!(rules(&records), vec![(3, "unique"), (4, "type")]);
        assert_eq!(records[0]["first_row"], 2);
    }

    #[test]
    fn test_required_and_lengths() {
        let records = check(json!({"column": "customer", "required": true, "max_length": 5}))
            .evaluate(&table());
        assert_eq!(rules(&records), vec![(2, "required"), (4, "max_length")]);
    }

    #[test]
    fn test_range() {
        let records = check(json!({"column": "total", "minimum": 0, "maximum": 10}))
            .evaluate(&table());
        assert_eq!(rules(&records), vec![(2, "maximum"), (3, "minimum"), (4, "number")]);
    }

    #[test]
    fn test_enum() {
        let records = check(json!({"column": "state", "enum": ["open", "closed"]}))
            .evaluate(&table());
        assert_eq!(rules(&records), vec![(3, "enum")]);
    }

    #[test]
    fn test_columns() {
        let records = check(json!({"columns": ["id", "email"]})).evaluate(&table());
        assert_eq!(records, vec![json!({"rule": "columns", "column": "email"})]);

        let records = check(json!({"column": "email", "required": true})).evaluate(&table());
        assert_eq!(records[0]["rule"], "column");
    }

    #[test]
    fn test_invalid_checks() {
        assert!(Check::from_value(&json!({"colum": "id"})).is_err());
        assert!(Check::from_value(&json!({"required": true})).is_err());
        assert!(Check::from_value(&json!({})).is_err());
        assert!(Check::from_value(&json!({"column": "id", "type": "uuid"})).is_err());
    }
}
