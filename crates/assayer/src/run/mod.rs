//! Run lifecycle.
//!
//! A [`Run`] is built by a [`RunBuilder`] in the CREATED state. Entering it
//! (see [`Run::enter`] and [`Run::scope`]) moves it to RUNNING and logs the run
//! metadata and an environment snapshot. Leaving it, on every path, logs the
//! final run metadata and cleans the input stores:
//!
//! - [`ActiveRun::finish`] → FINISHED
//! - [`ActiveRun::fail`] with [`Error::Interrupted`] → INTERRUPTED
//! - any other failure, a dropped guard, or a panic → ERROR

mod builder;
mod env;
mod info;

pub use builder::RunBuilder;
pub use env::EnvSnapshot;
pub use info::{RunInfo, RunStatus};

use crate::error::{Error, RunError, StoreError};
use crate::handler::RunHandler;
use crate::operation::{Constraint, ErrorReportMode, Metric, Operation};
use crate::plugin::{BuildParams, PluginOutput};
use crate::report::ArtifactObject;
use crate::results::ResultRegistry;
use crate::store::{MetadataKind, StoreHandler, file_name_of};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

/// Record of one persisted artifact, also logged as `artifact_<n>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    /// Id of the plugin that rendered it; `None` for input data copies.
    pub plugin: Option<String>,
    pub resource: String,
    pub filename: String,
    pub location: Option<String>,
}

/// A run: resources, stores, configured libraries and accumulated results.
pub struct Run {
    info: RunInfo,
    handler: RunHandler,
    stores: StoreHandler,
    /// Persist count per artifact filename.
    artifact_names: HashMap<String, usize>,
}

impl Run {
    pub(crate) fn new(info: RunInfo, handler: RunHandler, stores: StoreHandler) -> Self {
        Self {
            info,
            handler,
            stores,
            artifact_names: HashMap::new(),
        }
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn status(&self) -> RunStatus {
        self.info.status
    }

    pub fn results(&self) -> &ResultRegistry {
        self.handler.results()
    }

    pub fn stores(&self) -> &StoreHandler {
        &self.stores
    }

    /// CREATED → RUNNING. Logs `run.json` and `run_env.json`.
    pub fn enter(&mut self) -> Result<ActiveRun<'_>, Error> {
        if self.info.status != RunStatus::Created {
            return Err(RunError::InvalidState {
                expected: RunStatus::Created,
                actual: self.info.status,
            }
            .into());
        }
        self.info.status = RunStatus::Running;
        self.info.started = Some(Utc::now());
        tracing::info!(
            experiment = %self.info.experiment,
            run_id = %self.info.run_id,
            "run started"
        );

        let entered = self.log_run_info().and_then(|_| {
            let env = serde_json::to_value(EnvSnapshot::capture()).map_err(StoreError::from)?;
            self.stores
                .metadata_store()
                .log_metadata(&env, MetadataKind::RunEnv)?;
            Ok(())
        });
        let active = ActiveRun {
            run: self,
            closed: false,
        };
        // A failed entry still leaves through the guard.
        entered?;
        Ok(active)
    }

    /// Enter the run, call `f`, and leave with the matching final status.
    pub fn scope<T>(&mut self, f: impl FnOnce(&mut Run) -> Result<T, Error>) -> Result<T, Error> {
        let mut active = self.enter()?;
        match f(&mut active) {
            Ok(value) => {
                active.finish()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(exit) = active.fail(&e) {
                    tracing::warn!(error = %exit, "failed to record run exit");
                }
                Err(e)
            }
        }
    }

    fn log_run_info(&mut self) -> Result<(), Error> {
        let value = serde_json::to_value(&self.info).map_err(StoreError::from)?;
        self.stores
            .metadata_store()
            .log_metadata(&value, MetadataKind::Run)?;
        Ok(())
    }

    /// Record the final status, log it, clean every input store.
    fn exit(&mut self, status: RunStatus, error: Option<String>) -> Result<(), Error> {
        self.info.status = status;
        self.info.finished = Some(Utc::now());
        self.info.error = error;
        tracing::info!(
            run_id = %self.info.run_id,
            %status,
            duration = self.info.duration().unwrap_or_default(),
            "run ended"
        );
        let logged = self.log_run_info();
        self.stores.inputs().clean_all();
        logged
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.info.status != RunStatus::Running {
            return Err(RunError::InvalidState {
                expected: RunStatus::Running,
                actual: self.info.status,
            }
            .into());
        }
        Ok(())
    }

    fn run_operation(
        &mut self,
        operation: Operation,
        params: BuildParams,
        error_report: ErrorReportMode,
    ) -> Result<Vec<Arc<PluginOutput>>, Error> {
        self.ensure_running()?;
        self.handler.run(
            operation,
            &self.info.resources,
            self.stores.inputs(),
            &params,
            error_report,
        )
    }

    /// Schema inference over every resource.
    pub fn infer(&mut self) -> Result<Vec<Arc<PluginOutput>>, Error> {
        self.run_operation(Operation::Inference, BuildParams::All, ErrorReportMode::default())
    }

    /// Check `constraints` against the resources they name.
    pub fn validate(
        &mut self,
        constraints: &[Constraint],
        error_report: ErrorReportMode,
    ) -> Result<Vec<Arc<PluginOutput>>, Error> {
        self.run_operation(
            Operation::Validation,
            BuildParams::Constraints(constraints.to_vec()),
            error_report,
        )
    }

    /// Profile every resource.
    pub fn profile(&mut self) -> Result<Vec<Arc<PluginOutput>>, Error> {
        self.run_operation(Operation::Profiling, BuildParams::All, ErrorReportMode::default())
    }

    /// Compute `metrics` over the resources they name.
    pub fn measure(&mut self, metrics: &[Metric]) -> Result<Vec<Arc<PluginOutput>>, Error> {
        self.run_operation(
            Operation::Metric,
            BuildParams::Metrics(metrics.to_vec()),
            ErrorReportMode::default(),
        )
    }

    pub fn log_schema(&mut self) -> Result<Vec<Option<String>>, Error> {
        self.require_metadata_store()?;
        let outputs = self.infer()?;
        self.log_reports(Operation::Inference, &outputs)
    }

    pub fn log_report(
        &mut self,
        constraints: &[Constraint],
        error_report: ErrorReportMode,
    ) -> Result<Vec<Option<String>>, Error> {
        self.require_metadata_store()?;
        let outputs = self.validate(constraints, error_report)?;
        self.log_reports(Operation::Validation, &outputs)
    }

    pub fn log_profile(&mut self) -> Result<Vec<Option<String>>, Error> {
        self.require_metadata_store()?;
        let outputs = self.profile()?;
        self.log_reports(Operation::Profiling, &outputs)
    }

    pub fn log_metric(&mut self, metrics: &[Metric]) -> Result<Vec<Option<String>>, Error> {
        self.require_metadata_store()?;
        let outputs = self.measure(metrics)?;
        self.log_reports(Operation::Metric, &outputs)
    }

    pub fn persist_schema(&mut self) -> Result<Vec<PersistedArtifact>, Error> {
        let outputs = self.infer()?;
        self.persist_artifacts(&outputs)
    }

    pub fn persist_report(
        &mut self,
        constraints: &[Constraint],
        error_report: ErrorReportMode,
    ) -> Result<Vec<PersistedArtifact>, Error> {
        let outputs = self.validate(constraints, error_report)?;
        self.persist_artifacts(&outputs)
    }

    pub fn persist_profile(&mut self) -> Result<Vec<PersistedArtifact>, Error> {
        let outputs = self.profile()?;
        self.persist_artifacts(&outputs)
    }

    pub fn persist_metric(&mut self, metrics: &[Metric]) -> Result<Vec<PersistedArtifact>, Error> {
        let outputs = self.measure(metrics)?;
        self.persist_artifacts(&outputs)
    }

    /// Copy every input resource into the artifact store, one artifact per
    /// locator of multi-file resources.
    pub fn persist_data(&mut self) -> Result<Vec<PersistedArtifact>, Error> {
        self.ensure_running()?;
        let mut persisted = Vec::new();
        for resource in self.info.resources.clone() {
            let store = self.stores.inputs().for_resource(&resource)?;
            for locator in resource.path.locators() {
                let path = store.fetch_file(locator)?;
                let name = data_file_name(locator, &path);
                let object = ArtifactObject::Path(path);
                persisted.push(self.persist_one(None, &resource.name, &object, &name)?);
            }
        }
        Ok(persisted)
    }

    fn require_metadata_store(&self) -> Result<(), Error> {
        if !self.stores.metadata_configured() {
            return Err(RunError::MetadataStoreNotConfigured.into());
        }
        Ok(())
    }

    /// Log one metadata blob per output. A failed report is logged as an
    /// error blob so nothing requested goes missing.
    fn log_reports(
        &mut self,
        operation: Operation,
        outputs: &[Arc<PluginOutput>],
    ) -> Result<Vec<Option<String>>, Error> {
        let mut locations = Vec::with_capacity(outputs.len());
        for output in outputs {
            let (value, kind) = match &output.report.artifact {
                Some(report) => (
                    serde_json::to_value(report).map_err(StoreError::from)?,
                    report.metadata_kind(),
                ),
                None => (
                    serde_json::json!({
                        "plugin": output.plugin.id,
                        "library": output.plugin.library,
                        "resource": output.plugin.resource.name,
                        "framework": output.framework,
                        "status": output.report.status,
                        "errors": output.errors().collect::<Vec<_>>(),
                    }),
                    metadata_kind_for(operation),
                ),
            };
            locations.push(self.stores.metadata_store().log_metadata(&value, kind)?);
        }
        Ok(locations)
    }

    fn persist_artifacts(
        &mut self,
        outputs: &[Arc<PluginOutput>],
    ) -> Result<Vec<PersistedArtifact>, Error> {
        let mut persisted = Vec::new();
        for output in outputs {
            let Some(artifacts) = &output.artifact.artifact else {
                continue;
            };
            for artifact in artifacts {
                let record = self.persist_one(
                    Some(output.plugin.id.clone()),
                    &output.plugin.resource.name,
                    &artifact.object,
                    &artifact.filename,
                )?;
                persisted.push(record);
            }
        }
        Ok(persisted)
    }

    fn persist_one(
        &mut self,
        plugin: Option<String>,
        resource: &str,
        object: &ArtifactObject,
        filename: &str,
    ) -> Result<PersistedArtifact, Error> {
        let filename = self.next_artifact_name(filename);
        let location = self
            .stores
            .artifact_store()
            .persist_artifact(object, &filename)?;
        let record = PersistedArtifact {
            plugin,
            resource: resource.to_string(),
            filename,
            location,
        };
        if self.stores.metadata_configured() {
            let value = serde_json::to_value(&record).map_err(StoreError::from)?;
            self.stores
                .metadata_store()
                .log_metadata(&value, MetadataKind::Artifact)?;
        }
        tracing::debug!(filename = %record.filename, "persisted artifact");
        Ok(record)
    }

    /// `schema.json` → `schema_0.json`, then `schema_1.json`, ...
    fn next_artifact_name(&mut self, filename: &str) -> String {
        let n = self.artifact_names.entry(filename.to_string()).or_insert(0);
        let name = suffixed(filename, *n);
        *n += 1;
        name
    }
}

fn suffixed(filename: &str, n: usize) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{filename}_{n}"),
    }
}

/// Artifact name for a copied input: the locator's last segment, with the
/// materialized file's extension when the locator has none (SQL tables).
fn data_file_name(locator: &str, materialized: &Path) -> String {
    let name = file_name_of(locator);
    if Path::new(name).extension().is_some() {
        return name.to_string();
    }
    match materialized.extension() {
        Some(ext) => format!("{name}.{}", ext.to_string_lossy()),
        None => name.to_string(),
    }
}

fn metadata_kind_for(operation: Operation) -> MetadataKind {
    match operation {
        Operation::Inference => MetadataKind::Schema,
        Operation::Validation => MetadataKind::Report,
        Operation::Profiling => MetadataKind::Profile,
        Operation::Metric => MetadataKind::Metric,
    }
}

/// A run in the RUNNING state. Dereferences to [`Run`].
///
/// Dropping the guard without [`ActiveRun::finish`] or [`ActiveRun::fail`]
/// ends the run in ERROR.
pub struct ActiveRun<'a> {
    run: &'a mut Run,
    closed: bool,
}

impl ActiveRun<'_> {
    /// Leave the run as FINISHED.
    pub fn finish(mut self) -> Result<(), Error> {
        self.closed = true;
        self.run.exit(RunStatus::Finished, None)
    }

    /// Leave the run after `error`: INTERRUPTED for [`Error::Interrupted`],
    /// ERROR otherwise.
    pub fn fail(mut self, error: &Error) -> Result<(), Error> {
        self.closed = true;
        let status = match error {
            Error::Interrupted => RunStatus::Interrupted,
            _ => RunStatus::Error,
        };
        self.run.exit(status, Some(error.to_string()))
    }
}

impl Deref for ActiveRun<'_> {
    type Target = Run;

    fn deref(&self) -> &Run {
        self.run
    }
}

impl DerefMut for ActiveRun<'_> {
    fn deref_mut(&mut self) -> &mut Run {
        self.run
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let reason = if std::thread::panicking() {
            "panicked while running"
        } else {
            "left without finishing"
        };
        if let Err(e) = self.run.exit(RunStatus::Error, Some(reason.to_string())) {
            tracing::warn!(error = %e, "failed to record run exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed() {
        assert_eq!(suffixed("schema.json", 0), "schema_0.json");
        assert_eq!(suffixed("archive.tar.gz", 2), "archive.tar_2.gz");
        assert_eq!(suffixed("README", 1), "README_1");
        assert_eq!(suffixed(".hidden", 0), ".hidden_0");
    }

    #[test]
    fn test_data_file_name() {
        assert_eq!(data_file_name("data/a.csv", Path::new("/tmp/x/a.csv")), "a.csv");
        assert_eq!(
            data_file_name("https://host/a.csv?v=2", Path::new("/tmp/x/3_a.csv")),
            "a.csv"
        );
        assert_eq!(
            data_file_name("orders", Path::new("/tmp/x/0_orders.parquet")),
            "orders.parquet"
        );
    }
}
