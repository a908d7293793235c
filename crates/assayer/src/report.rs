//! Normalized cross-library reports and renderable artifacts.

use crate::operation::{Constraint, Metric};
use crate::store::MetadataKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Library that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    pub name: String,
    pub version: String,
}

/// A report in the library-independent shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NormalizedReport {
    Schema(SchemaReport),
    Validation(ValidationReport),
    Profile(ProfileReport),
    Metric(MetricReport),
}

impl NormalizedReport {
    /// Metadata kind this report is logged under.
    pub fn metadata_kind(&self) -> MetadataKind {
        match self {
            NormalizedReport::Schema(_) => MetadataKind::Schema,
            NormalizedReport::Validation(_) => MetadataKind::Report,
            NormalizedReport::Profile(_) => MetadataKind::Profile,
            NormalizedReport::Metric(_) => MetadataKind::Metric,
        }
    }
}

/// Inferred schema of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub framework: Framework,
    pub resource: String,
    pub duration: f64,
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of one constraint against one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub framework: Framework,
    pub resource: String,
    pub duration: f64,
    pub constraint: Constraint,
    pub valid: bool,
    pub errors: ErrorSummary,
}

/// Failing records, trimmed by the error report mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub count: usize,
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
}

/// Statistical profile of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub framework: Framework,
    pub resource: String,
    pub duration: f64,
    pub stats: serde_json::Value,
    pub fields: IndexMap<String, serde_json::Value>,
}

/// Value of one metric over one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub framework: Framework,
    pub resource: String,
    pub duration: f64,
    pub metric: Metric,
    pub value: serde_json::Value,
}

/// Object a plugin hands over for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ArtifactObject {
    /// A file or directory on the local filesystem.
    Path(PathBuf),
    /// A JSON object or array.
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Text(String),
}

/// An artifact with its target filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub object: ArtifactObject,
    pub filename: String,
}

impl RenderedArtifact {
    pub fn new(object: ArtifactObject, filename: impl Into<String>) -> Self {
        Self {
            object,
            filename: filename.into(),
        }
    }

    /// Render a JSON value as `filename`.
    pub fn json(value: serde_json::Value, filename: impl Into<String>) -> Self {
        Self::new(ArtifactObject::Json(value), filename)
    }
}
