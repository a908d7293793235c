//! Plugin declarations and traits.
//!
//! A [`Library`] wraps one data-quality framework. For each operation it
//! supports, it hands out a [`PluginBuilder`] that expands the run's resources
//! and parameters into [`Plugin`]s, one per unit of work.

use crate::error::{ConfigError, Error, PluginError};
use crate::operation::{Constraint, ErrorReportMode, Metric, Operation, Payload};
use crate::reader::{DataReader, ReaderKind};
use crate::report::{Framework, NormalizedReport, RenderedArtifact};
use crate::resource::{Resource, StoreParameters};
use crate::store::{InputStore, InputStores};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

/// Execution lane a plugin may safely run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    /// Driver thread only.
    Sequential,
    /// Safe to share the driver's stores from a thread pool.
    MultiThread,
    /// Safe to run in an isolated worker from its spec alone.
    MultiProcess,
}

/// Declaration of a library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryDecl {
    /// Name referenced from run configuration.
    pub name: String,
    /// Version of the wrapped framework.
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Operations this library implements, with the affinity of their plugins.
    pub operations: IndexMap<Operation, Affinity>,
    /// Reader kind the library's plugins consume.
    #[serde(default)]
    pub reader: ReaderKind,
}

impl LibraryDecl {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            operations: IndexMap::new(),
            reader: ReaderKind::default(),
        }
    }

    /// Set the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Declare an operation and the affinity of its plugins.
    pub fn operation(mut self, operation: Operation, affinity: Affinity) -> Self {
        self.operations.insert(operation, affinity);
        self
    }

    /// Set the reader kind.
    pub fn reader(mut self, reader: ReaderKind) -> Self {
        self.reader = reader;
        self
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains_key(&operation)
    }

    pub fn affinity(&self, operation: Operation) -> Option<Affinity> {
        self.operations.get(&operation).copied()
    }

    pub fn framework(&self) -> Framework {
        Framework {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Everything a plugin needs, as plain data.
///
/// This is what crosses into the process lane: the worker rebuilds the store
/// from `store` and asks the library to rehydrate the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub id: String,
    pub operation: Operation,
    pub library: String,
    pub affinity: Affinity,
    pub resource: Resource,
    pub store: StoreParameters,
    pub reader: ReaderKind,
    #[serde(default = "default_payload")]
    pub payload: Payload,
    #[serde(default)]
    pub error_report: ErrorReportMode,
    #[serde(default)]
    pub exec_args: IndexMap<String, serde_json::Value>,
}

fn default_payload() -> Payload {
    Payload::None
}

impl PluginSpec {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self.payload.name() {
            Some(name) => format!(
                "{}:{}/{}[{}]",
                self.library, self.operation, self.resource.name, name
            ),
            None => format!("{}:{}/{}", self.library, self.operation, self.resource.name),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Error,
}

/// Result of one wrapped plugin stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult<T> {
    pub status: StageStatus,
    /// Seconds.
    pub duration: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub artifact: Option<T>,
}

impl<T> StageResult<T> {
    pub fn success(artifact: T, duration: f64) -> Self {
        Self {
            status: StageStatus::Success,
            duration,
            errors: Vec::new(),
            artifact: Some(artifact),
        }
    }

    pub fn failure(error: impl ToString, duration: f64) -> Self {
        Self {
            status: StageStatus::Error,
            duration,
            errors: vec![error.to_string()],
            artifact: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}

/// Run a stage under the measure/capture contract: timed, errors and panics
/// recorded, never propagated.
pub fn run_stage<T>(stage: impl FnOnce() -> Result<T, PluginError>) -> StageResult<T> {
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(stage));
    let duration = start.elapsed().as_secs_f64();
    match outcome {
        Ok(Ok(value)) => StageResult::success(value, duration),
        Ok(Err(e)) => StageResult::failure(e, duration),
        Err(panic) => StageResult::failure(PluginError::Panicked(panic_message(&*panic)), duration),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The three stage results of one executed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOutput {
    pub plugin: PluginSpec,
    pub framework: Framework,
    /// Raw framework result.
    pub operation: StageResult<serde_json::Value>,
    pub report: StageResult<NormalizedReport>,
    pub artifact: StageResult<Vec<RenderedArtifact>>,
}

impl PluginOutput {
    /// Output for a plugin that never ran (worker or rehydration failure).
    pub fn failed(plugin: PluginSpec, framework: Framework, error: PluginError) -> Self {
        let message = error.to_string();
        Self {
            plugin,
            framework,
            operation: StageResult::failure(&message, 0.0),
            report: StageResult::failure(PluginError::OperationFailed, 0.0),
            artifact: StageResult::failure(PluginError::OperationFailed, 0.0),
        }
    }

    /// Error if any stage failed.
    pub fn status(&self) -> StageStatus {
        if self.operation.is_success() && self.report.is_success() && self.artifact.is_success() {
            StageStatus::Success
        } else {
            StageStatus::Error
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == StageStatus::Success
    }

    /// Every error message of every stage.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.operation
            .errors
            .iter()
            .chain(&self.report.errors)
            .chain(&self.artifact.errors)
            .map(String::as_str)
    }
}

/// One unit of work: a library operation on one resource (and one constraint
/// or metric).
pub trait Plugin: Send {
    fn spec(&self) -> &PluginSpec;

    fn framework_name(&self) -> &str;

    fn framework_version(&self) -> String;

    /// Run the wrapped framework and return its raw result.
    fn run_operation(&self) -> Result<serde_json::Value, PluginError>;

    /// Normalize the raw result.
    fn render_report(&self, raw: &serde_json::Value) -> Result<NormalizedReport, PluginError>;

    /// Turn the raw result into persistable artifacts.
    fn render_artifact(
        &self,
        raw: &serde_json::Value,
    ) -> Result<Vec<RenderedArtifact>, PluginError>;

    fn framework(&self) -> Framework {
        Framework {
            name: self.framework_name().to_string(),
            version: self.framework_version(),
        }
    }

    /// Run the three stages. Never fails; stage errors are captured.
    fn execute(&self) -> PluginOutput {
        let operation = run_stage(|| self.run_operation());
        let (report, artifact) = match &operation.artifact {
            Some(raw) => (
                run_stage(|| self.render_report(raw)),
                run_stage(|| self.render_artifact(raw)),
            ),
            None => (
                StageResult::failure(PluginError::OperationFailed, 0.0),
                StageResult::failure(PluginError::OperationFailed, 0.0),
            ),
        };
        for error in operation
            .errors
            .iter()
            .chain(&report.errors)
            .chain(&artifact.errors)
        {
            tracing::warn!(plugin = %self.spec().label(), %error, "plugin stage failed");
        }
        PluginOutput {
            plugin: self.spec().clone(),
            framework: self.framework(),
            operation,
            report,
            artifact,
        }
    }
}

/// Operation parameters handed to builders.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BuildParams {
    /// Inference and profiling: every resource.
    #[default]
    All,
    Constraints(Vec<Constraint>),
    Metrics(Vec<Metric>),
}

/// Input to [`PluginBuilder::build`].
pub struct BuildRequest<'a> {
    pub operation: Operation,
    pub resources: &'a [Resource],
    pub stores: &'a InputStores,
    pub params: &'a BuildParams,
    pub error_report: ErrorReportMode,
    pub exec_args: &'a IndexMap<String, serde_json::Value>,
}

/// A resource bound to its live store and one payload.
pub struct Target {
    pub resource: Resource,
    pub store: Arc<dyn InputStore>,
    pub payload: Payload,
}

impl BuildRequest<'_> {
    /// Every (resource, payload) pair the request covers, with stores
    /// resolved. Constraints and metrics bind only the resources they name.
    ///
    /// Every store is resolved before anything is returned, so a missing store
    /// fails the whole build.
    pub fn targets(&self) -> Result<Vec<Target>, Error> {
        let pairs: Vec<(&Resource, Payload)> = match self.params {
            BuildParams::All => self.resources.iter().map(|r| (r, Payload::None)).collect(),
            BuildParams::Constraints(constraints) => {
                let mut pairs = Vec::new();
                for constraint in constraints {
                    for name in &constraint.resources {
                        let resource = self.resource(name, "constraint", &constraint.name)?;
                        pairs.push((resource, Payload::Constraint(constraint.clone())));
                    }
                }
                pairs
            }
            BuildParams::Metrics(metrics) => {
                let mut pairs = Vec::new();
                for metric in metrics {
                    for name in &metric.resources {
                        let resource = self.resource(name, "metric", &metric.name)?;
                        pairs.push((resource, Payload::Metric(metric.clone())));
                    }
                }
                pairs
            }
        };

        let mut targets = Vec::with_capacity(pairs.len());
        for (resource, payload) in pairs {
            let store = self.stores.for_resource(resource)?;
            targets.push(Target {
                resource: resource.clone(),
                store,
                payload,
            });
        }
        Ok(targets)
    }

    fn resource(&self, name: &str, what: &str, owner: &str) -> Result<&Resource, Error> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{what} '{owner}' references unknown resource '{name}'"
                ))
                    .into()
            })
    }

    /// Build the `PluginSpec` and reader for a target of `decl`. `None` when the
    /// library does not declare the operation, or the constraint or metric
    /// names another library.
    pub fn bind(&self, decl: &LibraryDecl, target: Target) -> Option<(PluginSpec, DataReader)> {
        let affinity = decl.affinity(self.operation)?;
        let kind = match &target.payload {
            Payload::None => None,
            Payload::Constraint(c) => Some(&c.kind),
            Payload::Metric(m) => Some(&m.kind),
        };
        if kind.is_some_and(|k| *k != decl.name) {
            return None;
        }
        let spec = PluginSpec {
            id: uuid::Uuid::new_v4().to_string(),
            operation: self.operation,
            library: decl.name.clone(),
            affinity,
            store: target.store.params().clone(),
            resource: target.resource,
            reader: decl.reader,
            payload: target.payload,
            error_report: self.error_report,
            exec_args: self.exec_args.clone(),
        };
        Some((spec, DataReader::new(target.store, decl.reader)))
    }
}

/// Expands a run's resources and parameters into plugins for one library.
pub trait PluginBuilder: Send {
    fn build(&mut self, request: &BuildRequest<'_>) -> Result<Vec<Box<dyn Plugin>>, Error>;

    /// Release per-builder resources. Called once per operation invocation,
    /// whether or not `build` succeeded.
    fn destroy(&mut self) {}
}

/// A data-quality framework wrapped for the engine.
pub trait Library: Send + Sync {
    fn decl(&self) -> &LibraryDecl;

    /// A fresh builder for `operation`. Only called for declared operations.
    fn builder(&self, operation: Operation) -> Box<dyn PluginBuilder>;

    /// Rebuild a plugin from its spec inside an isolated worker.
    fn rehydrate(
        &self,
        spec: PluginSpec,
        reader: DataReader,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        let _ = reader;
        Err(PluginError::NotIsolatable(spec.label()))
    }
}
