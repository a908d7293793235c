//! Operations and their parameter objects.

use crate::error::RunError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Inference,
    Validation,
    Profiling,
    Metric,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Inference,
        Operation::Validation,
        Operation::Profiling,
        Operation::Metric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Inference => "inference",
            Operation::Validation => "validation",
            Operation::Profiling => "profiling",
            Operation::Metric => "metric",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validation rule, checked by the library named in `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Library that evaluates this constraint.
    #[serde(rename = "type")]
    pub kind: String,
    /// Names of the resources the constraint applies to.
    pub resources: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: u8,
    /// Library-specific check definition.
    #[serde(default)]
    pub check: serde_json::Value,
}

fn default_weight() -> u8 {
    5
}

/// A measurement, computed by the library named in `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub resources: Vec<String>,
    /// Library-specific metric identifier.
    pub metric: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Operation parameters bound to a single plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    None,
    Constraint(Constraint),
    Metric(Metric),
}

impl Payload {
    /// Name of the bound constraint or metric.
    pub fn name(&self) -> Option<&str> {
        match self {
            Payload::None => None,
            Payload::Constraint(c) => Some(&c.name),
            Payload::Metric(m) => Some(&m.name),
        }
    }
}

/// How much detail a validation report carries about failing records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorReportMode {
    /// Only the number of errors.
    Count,
    /// The first [`ErrorReportMode::PARTIAL_LIMIT`] errors.
    #[default]
    Partial,
    /// Every error.
    Full,
}

impl ErrorReportMode {
    pub const PARTIAL_LIMIT: usize = 100;

    /// Trim a list of error records according to the mode.
    pub fn apply<T>(&self, mut records: Vec<T>) -> Vec<T> {
        match self {
            ErrorReportMode::Count => Vec::new(),
            ErrorReportMode::Partial => {
                records.truncate(Self::PARTIAL_LIMIT);
                records
            }
            ErrorReportMode::Full => records,
        }
    }
}

impl FromStr for ErrorReportMode {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(ErrorReportMode::Count),
            "partial" => Ok(ErrorReportMode::Partial),
            "full" => Ok(ErrorReportMode::Full),
            other => Err(RunError::InvalidErrorReport(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_report_mode_parse() {
        assert_eq!("count".parse::<ErrorReportMode>().unwrap(), ErrorReportMode::Count);
        assert_eq!("full".parse::<ErrorReportMode>().unwrap(), ErrorReportMode::Full);
        assert!(matches!(
            "verbose".parse::<ErrorReportMode>(),
            Err(RunError::InvalidErrorReport(s)) if s == "verbose"
        ));
    }

    #[test]
    fn test_error_report_mode_apply() {
        let records: Vec<usize> = (0..250).collect();
        assert!(ErrorReportMode::Count.apply(records.clone()).is_empty());
        assert_eq!(ErrorReportMode::Partial.apply(records.clone()).len(), 100);
        assert_eq!(ErrorReportMode::Full.apply(records).len(), 250);
    }

    #[test]
    fn test_constraint_from_yaml() {
        let yaml = r#"
name: id-unique
type: tabular
resources: [orders]
check:
  field: id
  check: unique
"#;
        let constraint: Constraint = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(constraint.kind, "tabular");
        assert_eq!(constraint.weight, 5);
        assert_eq!(constraint.check["field"], "id");
    }
}
