//! The `tabular` library: column-level operations over delimited files.
//!
//! Plugins read their resource through the table reader, so any store that
//! can materialize a CSV or TSV file works.

mod checks;
mod infer;
mod profile;

pub use checks::Check;
pub use infer::{FieldType, infer_column, infer_table};

use assayer::{
    Affinity, BuildRequest, DataReader, Error, ErrorSummary, Library, LibraryDecl, MetricReport,
    NormalizedReport, Operation, Payload, Plugin, PluginBuilder, PluginError, PluginSpec,
    ProfileReport, ReaderKind, RenderedArtifact, SchemaField, SchemaReport, Table,
    ValidationReport,
};
use serde_json::{Value, json};
use std::time::Instant;

pub const NAME: &str = "tabular";

pub struct TabularLibrary {
    decl: LibraryDecl,
}

impl TabularLibrary {
    pub fn new() -> Self {
        let decl = LibraryDecl::new(NAME, env!("CARGO_PKG_VERSION"))
            .description("Column checks, type inference, profiles and metrics for CSV data")
            .operation(Operation::Inference, Affinity::MultiProcess)
            .operation(Operation::Validation, Affinity::MultiThread)
            .operation(Operation::Profiling, Affinity::MultiProcess)
            .operation(Operation::Metric, Affinity::MultiThread)
            .reader(ReaderKind::Table);
        Self { decl }
    }
}

impl Default for TabularLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl Library for TabularLibrary {
    fn decl(&self) -> &LibraryDecl {
        &self.decl
    }

    fn builder(&self, _: Operation) -> Box<dyn PluginBuilder> {
        Box::new(TabularBuilder {
            decl: self.decl.clone(),
        })
    }

    fn rehydrate(
        &self,
        spec: PluginSpec,
        reader: DataReader,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        Ok(Box::new(TabularPlugin { spec, reader }))
    }
}

struct TabularBuilder {
    decl: LibraryDecl,
}

impl PluginBuilder for TabularBuilder {
    fn build(&mut self, request: &BuildRequest<'_>) -> Result<Vec<Box<dyn Plugin>>, Error> {
        let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
        for target in request.targets()? {
            if let Some((spec, reader)) = request.bind(&self.decl, target) {
                plugins.push(Box::new(TabularPlugin { spec, reader }));
            }
        }
        tracing::debug!(
            operation = %request.operation,
            plugins = plugins.len(),
            "built tabular plugins"
        );
        Ok(plugins)
    }
}

/// One tabular operation on one resource.
pub struct TabularPlugin {
    spec: PluginSpec,
    reader: DataReader,
}

impl TabularPlugin {
    fn table(&self) -> Result<Table, PluginError> {
        self.reader.read_table(&self.spec.resource)
    }

    fn infer(&self, table: &Table) -> Value {
        let fields: Vec<Value> = infer_table(table)
            .into_iter()
            .map(|(name, field_type)| json!({ "name": name, "type": field_type }))
            .collect();
        json!({ "fields": fields })
    }

    fn validate(&self, table: &Table) -> Result<Value, PluginError> {
        let Payload::Constraint(constraint) = &self.spec.payload else {
            return Err(PluginError::InvalidParams("validation needs a constraint".into()));
        };
        let records = Check::from_value(&constraint.check)?.evaluate(table);
        let count = records.len();
        Ok(json!({
            "valid": count == 0,
            "count": count,
            "records": self.spec.error_report.apply(records),
        }))
    }

    fn profile(&self, table: &Table) -> Value {
        let (stats, fields) = profile::profile(table);
        json!({ "stats": stats, "fields": fields })
    }

    fn measure(&self, table: &Table) -> Result<Value, PluginError> {
        let Payload::Metric(metric) = &self.spec.payload else {
            return Err(PluginError::InvalidParams("metric needs a metric definition".into()));
        };
        Ok(json!({ "value": profile::measure(table, metric)? }))
    }
}

impl Plugin for TabularPlugin {
    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    fn framework_name(&self) -> &str {
        NAME
    }

    fn framework_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn run_operation(&self) -> Result<Value, PluginError> {
        let start = Instant::now();
        let table = self.table()?;
        let mut raw = match self.spec.operation {
            Operation::Inference => self.infer(&table),
            Operation::Validation => self.validate(&table)?,
            Operation::Profiling => self.profile(&table),
            Operation::Metric => self.measure(&table)?,
        };
        raw["duration"] = json!(start.elapsed().as_secs_f64());
        Ok(raw)
    }

    fn render_report(&self, raw: &Value) -> Result<NormalizedReport, PluginError> {
        let framework = self.framework();
        let resource = self.spec.resource.name.clone();
        let duration = raw["duration"].as_f64().unwrap_or_default();

        let report = match (&self.spec.operation, &self.spec.payload) {
            (Operation::Inference, _) => {
                let fields = raw["fields"]
                    .as_array()
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|f| SchemaField {
                                name: f["name"].as_str().unwrap_or_default().to_string(),
                                field_type: f["type"].as_str().unwrap_or("string").to_string(),
                                description: None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                NormalizedReport::Schema(SchemaReport {
                    framework,
                    resource,
                    duration,
                    fields,
                })
            }
            (Operation::Validation, Payload::Constraint(constraint)) => {
                let count = raw["count"].as_u64().unwrap_or_default() as usize;
                NormalizedReport::Validation(ValidationReport {
                    framework,
                    resource,
                    duration,
                    constraint: constraint.clone(),
                    valid: count == 0,
                    errors: ErrorSummary {
                        count,
                        records: raw["records"].as_array().cloned().unwrap_or_default(),
                    },
                })
            }
            (Operation::Profiling, _) => NormalizedReport::Profile(ProfileReport {
                framework,
                resource,
                duration,
                stats: raw["stats"].clone(),
                fields: serde_json::from_value(raw["fields"].clone())?,
            }),
            (Operation::Metric, Payload::Metric(metric)) => NormalizedReport::Metric(MetricReport {
                framework,
                resource,
                duration,
                metric: metric.clone(),
                value: raw["value"].clone(),
            }),
            (operation, _) => {
                return Err(PluginError::InvalidParams(format!(
                    "no payload to render {operation} report"
                )));
            }
        };
        Ok(report)
    }

    fn render_artifact(&self, raw: &Value) -> Result<Vec<RenderedArtifact>, PluginError> {
        let filename = match self.spec.operation {
            Operation::Inference => "schema.json",
            Operation::Validation => "report.json",
            Operation::Profiling => "profile.json",
            Operation::Metric => "metric.json",
        };
        let mut value = raw.clone();
        if let Some(object) = value.as_object_mut() {
            object.remove("duration");
            object.insert("resource".into(), json!(self.spec.resource.name));
        }
        Ok(vec![RenderedArtifact::json(value, filename)])
    }
}
