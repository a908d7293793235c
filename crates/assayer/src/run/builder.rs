use super::{Run, RunInfo};
use crate::config::{ProjectConfig, RunConfig};
use crate::error::{ConfigError, Error};
use crate::handler::RunHandler;
use crate::registry::PluginRegistry;
use crate::resource::{Resource, StoreKind, StoreParameters, check_unique_names, validate_stores};
use crate::store::{
    DummyOutputStore, InputStore, InputStores, StoreHandler, build_input_store, build_output_store,
};
use std::sync::Arc;

/// Name of the local store added when a run configures no input store.
pub const IMPLICIT_STORE: &str = "local";

/// Validates configuration, initializes the output stores, creates a [`Run`].
pub struct RunBuilder {
    experiment: String,
    run_id: Option<String>,
    overwrite: bool,
    stores: Vec<StoreParameters>,
    live_stores: Vec<Arc<dyn InputStore>>,
    metadata_store: Option<StoreParameters>,
    artifact_store: Option<StoreParameters>,
    resources: Vec<Resource>,
    config: RunConfig,
    registry: Arc<PluginRegistry>,
}

impl RunBuilder {
    pub fn new(experiment: impl Into<String>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            experiment: experiment.into(),
            run_id: None,
            overwrite: false,
            stores: Vec::new(),
            live_stores: Vec::new(),
            metadata_store: None,
            artifact_store: None,
            resources: Vec::new(),
            config: RunConfig::default(),
            registry,
        }
    }

    /// Builder pre-filled from a project file.
    pub fn from_project(project: &ProjectConfig, registry: Arc<PluginRegistry>) -> Self {
        let mut builder = Self::new(project.experiment.clone(), registry)
            .overwrite(project.overwrite)
            .resources(project.resources.iter().cloned())
            .config(project.run.clone());
        builder.run_id = project.run_id.clone();
        builder.stores = project.stores.clone();
        builder.metadata_store = project.metadata_store.clone();
        builder.artifact_store = project.artifact_store.clone();
        builder
    }

    /// Set the run id. Defaults to a random UUID.
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Replace an existing run with the same id.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Add an input store by parameters.
    pub fn store(mut self, params: StoreParameters) -> Self {
        self.stores.push(params);
        self
    }

    /// Add an already constructed input store.
    pub fn input_store(mut self, store: Arc<dyn InputStore>) -> Self {
        self.live_stores.push(store);
        self
    }

    /// Where metadata goes. Without one, metadata is discarded.
    pub fn metadata_store(mut self, params: StoreParameters) -> Self {
        self.metadata_store = Some(params);
        self
    }

    /// Where artifacts go. Defaults to the metadata store.
    pub fn artifact_store(mut self, params: StoreParameters) -> Self {
        self.artifact_store = Some(params);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resources(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.resources.extend(resources);
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Run, Error> {
        let mut params: Vec<StoreParameters> = self.stores.clone();
        params.extend(self.live_stores.iter().map(|s| s.params().clone()));
        if params.is_empty() {
            params.push(StoreParameters::new(IMPLICIT_STORE, StoreKind::Local).default_store());
        }
        validate_stores(&params)?;
        check_unique_names(&self.resources)?;
        if self.config.num_worker == 0 {
            return Err(ConfigError::Invalid("num_worker must be at least 1".into()).into());
        }

        let mut inputs = InputStores::new();
        let built = params.len() - self.live_stores.len();
        for store in &params[..built] {
            inputs.insert(build_input_store(store)?);
        }
        for store in self.live_stores {
            inputs.insert(store);
        }

        let metadata = match &self.metadata_store {
            Some(params) => build_output_store(params)?,
            None => Box::new(DummyOutputStore),
        };
        let artifacts = self
            .artifact_store
            .as_ref()
            .map(build_output_store)
            .transpose()?;

        let run_id = self
            .run_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let mut stores = StoreHandler::new(inputs, metadata, artifacts);
        stores.init_run(&self.experiment, &run_id, self.overwrite)?;

        let snapshot = params.iter().map(StoreParameters::redacted).collect();
        let info = RunInfo::new(
            self.experiment,
            run_id,
            self.config.clone(),
            self.resources,
            snapshot,
        );
        let handler = RunHandler::new(self.registry, self.config);
        tracing::debug!(run_id = %info.run_id, stores = stores.inputs().len(), "run created");
        Ok(Run::new(info, handler, stores))
    }
}
