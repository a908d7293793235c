//! Stores: where input resources come from and where run outputs go.
//!
//! An [`InputStore`] materializes resources from a backend and caches the
//! result per locator, so a resource is fetched at most once per store
//! instance per run. An [`OutputStore`] owns the run directory tree and
//! writes metadata blobs and artifacts into it.

mod cache;
mod dummy;
mod local;
mod output;
#[cfg(feature = "remote")]
mod remote;
#[cfg(feature = "s3")]
mod s3;
#[cfg(feature = "sql")]
mod sql;

pub use cache::ResourceCache;
pub(crate) use cache::file_name_of;
pub use dummy::DummyStore;
pub use local::LocalStore;
pub use output::{DummyOutputStore, LocalOutputStore, MetadataKind, OutputStore};
#[cfg(feature = "remote")]
pub use remote::RemoteStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;
#[cfg(feature = "sql")]
pub use sql::SqlStore;

use crate::error::StoreError;
use crate::resource::{Resource, StoreKind, StoreParameters};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Per-request timeout for network backends.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A backend that materializes resources.
///
/// Implementors provide [`InputStore::materialize`]; [`InputStore::fetch_file`]
/// wraps it with the per-locator cache.
pub trait InputStore: Send + Sync {
    /// Parameters this store was built from.
    fn params(&self) -> &StoreParameters;

    /// Cache of materialized locators.
    fn cache(&self) -> &ResourceCache;

    /// Fetch `locator` into a local path. Only called on a cache miss.
    fn materialize(&self, locator: &str) -> Result<PathBuf, StoreError>;

    /// Native reference to `locator` (connection string, presigned URL, local
    /// path) without a full local copy.
    fn fetch_native(&self, locator: &str) -> Result<String, StoreError>;

    fn name(&self) -> &str {
        &self.params().name
    }

    /// Local path of `locator`, fetched on first use and cached afterwards.
    fn fetch_file(&self, locator: &str) -> Result<PathBuf, StoreError> {
        if let Some(path) = self.cache().get(locator) {
            tracing::debug!(store = self.name(), locator, "cache hit");
            return Ok(path);
        }
        let path = self.materialize(locator)?;
        tracing::debug!(store = self.name(), locator, path = %path.display(), "fetched");
        self.cache().insert(locator, path.clone());
        Ok(path)
    }

    /// Drop every cached entry and remove materialized files.
    fn clean_paths(&self) {
        self.cache().clear();
    }
}

/// Build an input store from its parameters.
pub fn build_input_store(params: &StoreParameters) -> Result<Arc<dyn InputStore>, StoreError> {
    match params.kind {
        StoreKind::Local => Ok(Arc::new(LocalStore::new(params.clone())?)),
        StoreKind::Dummy => Ok(Arc::new(DummyStore::new(params.clone())?)),
        #[cfg(feature = "remote")]
        StoreKind::Remote => Ok(Arc::new(RemoteStore::new(params.clone())?)),
        #[cfg(feature = "s3")]
        StoreKind::S3 => Ok(Arc::new(S3Store::new(params.clone())?)),
        #[cfg(feature = "sql")]
        StoreKind::Sql => Ok(Arc::new(SqlStore::new(params.clone())?)),
        #[allow(unreachable_patterns)]
        other => Err(StoreError::Unsupported(other.to_string())),
    }
}

/// Build an output store from its parameters. Only local and dummy stores can
/// receive run outputs.
pub fn build_output_store(params: &StoreParameters) -> Result<Box<dyn OutputStore>, StoreError> {
    match params.kind {
        StoreKind::Local => {
            let root = params
                .uri
                .as_deref()
                .or_else(|| params.config_str("path"))
                .unwrap_or("./assayer-runs");
            Ok(Box::new(LocalOutputStore::new(root)))
        }
        StoreKind::Dummy => Ok(Box::new(DummyOutputStore)),
        other => Err(StoreError::Unsupported(format!("{other} output store"))),
    }
}

/// Input stores of a run, keyed by name.
#[derive(Clone, Default)]
pub struct InputStores {
    stores: IndexMap<String, Arc<dyn InputStore>>,
    default: Option<String>,
}

impl InputStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store. The first store marked default, or the first store
    /// registered, answers for resources that name no store.
    pub fn insert(&mut self, store: Arc<dyn InputStore>) {
        let name = store.name().to_string();
        if store.params().is_default || self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.stores.insert(name, store);
    }

    /// Resolve a store by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn InputStore>, StoreError> {
        if name.is_empty() {
            return self.default_store();
        }
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Resolve the store a resource declares.
    pub fn for_resource(&self, resource: &Resource) -> Result<Arc<dyn InputStore>, StoreError> {
        self.get(&resource.store)
    }

    pub fn default_store(&self) -> Result<Arc<dyn InputStore>, StoreError> {
        self.default
            .as_deref()
            .and_then(|name| self.stores.get(name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound("<default>".into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn InputStore>> {
        self.stores.values()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Clean every store cache.
    pub fn clean_all(&self) {
        for store in self.stores.values() {
            store.clean_paths();
        }
    }
}

/// Input and output stores owned by a run.
pub struct StoreHandler {
    inputs: InputStores,
    metadata: Box<dyn OutputStore>,
    /// `None` when artifacts go to the metadata store.
    artifacts: Option<Box<dyn OutputStore>>,
}

impl StoreHandler {
    pub fn new(
        inputs: InputStores,
        metadata: Box<dyn OutputStore>,
        artifacts: Option<Box<dyn OutputStore>>,
    ) -> Self {
        Self {
            inputs,
            metadata,
            artifacts,
        }
    }

    pub fn inputs(&self) -> &InputStores {
        &self.inputs
    }

    pub fn metadata_store(&mut self) -> &mut dyn OutputStore {
        self.metadata.as_mut()
    }

    pub fn artifact_store(&mut self) -> &mut dyn OutputStore {
        match self.artifacts.as_mut() {
            Some(store) => store.as_mut(),
            None => self.metadata.as_mut(),
        }
    }

    /// True when metadata goes to a real backend.
    pub fn metadata_configured(&self) -> bool {
        !self.metadata.is_dummy()
    }

    /// Initialize the run directories on every output store.
    ///
    /// An artifact store rooted where the metadata store is would own the same
    /// run tree, so it is folded into the metadata store.
    pub fn init_run(
        &mut self,
        experiment: &str,
        run_id: &str,
        overwrite: bool,
    ) -> Result<(), crate::Error> {
        let shared = self
            .artifacts
            .as_ref()
            .is_some_and(|artifacts| same_root(artifacts.root(), self.metadata.root()));
        if shared {
            tracing::debug!(store = self.metadata.kind(), "artifacts share the metadata run tree");
            self.artifacts = None;
        }
        self.metadata.init_run(experiment, run_id, overwrite)?;
        if let Some(artifacts) = self.artifacts.as_mut() {
            artifacts.init_run(experiment, run_id, overwrite)?;
        }
        Ok(())
    }
}

fn same_root(a: Option<&Path>, b: Option<&Path>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => match (std::path::absolute(a), std::path::absolute(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        },
        _ => false,
    }
}

/// Copy a local file or directory tree to `target`.
pub(crate) fn copy_path(source: &Path, target: &Path) -> Result<(), StoreError> {
    if source.is_dir() {
        for entry in walkdir::WalkDir::new(source) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| StoreError::UnsupportedArtifact(e.to_string()))?;
            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else {
                std::fs::copy(entry.path(), &dest)?;
            }
        }
        Ok(())
    } else if source.is_file() {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, target)?;
        Ok(())
    } else {
        Err(StoreError::UnsupportedArtifact(format!(
            "path does not exist: {}",
            source.display()
        )))
    }
}
