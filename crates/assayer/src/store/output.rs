//! Output stores: run directories, metadata blobs, artifacts.

use super::copy_path;
use crate::error::{RunError, StoreError};
use crate::report::ArtifactObject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Category of a metadata blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Run,
    RunEnv,
    Schema,
    Report,
    Profile,
    Metric,
    Artifact,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKind::Run => "run",
            MetadataKind::RunEnv => "run_env",
            MetadataKind::Schema => "schema",
            MetadataKind::Report => "report",
            MetadataKind::Profile => "profile",
            MetadataKind::Metric => "metric",
            MetadataKind::Artifact => "artifact",
        }
    }

    /// Run and environment blobs are rewritten in place; everything else is
    /// numbered.
    pub fn is_singleton(&self) -> bool {
        matches!(self, MetadataKind::Run | MetadataKind::RunEnv)
    }
}

/// Destination of run metadata and artifacts.
///
/// Only the run driver writes to an output store, hence `&mut self`.
pub trait OutputStore: Send {
    /// Short backend name for logs.
    fn kind(&self) -> &'static str;

    /// True for the no-op store.
    fn is_dummy(&self) -> bool {
        false
    }

    /// Create the run directory tree. Fails with
    /// [`RunError::RunAlreadyExists`] when the run exists and `overwrite` is
    /// false; with `overwrite` the old tree is removed first.
    fn init_run(&mut self, experiment: &str, run_id: &str, overwrite: bool)
    -> Result<(), crate::Error>;

    /// Write a metadata blob. Returns its location, if any.
    fn log_metadata(
        &mut self,
        value: &serde_json::Value,
        kind: MetadataKind,
    ) -> Result<Option<String>, StoreError>;

    /// Write an artifact under `filename`. Returns its location, if any.
    fn persist_artifact(
        &mut self,
        object: &ArtifactObject,
        filename: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Root of the current run, once initialized.
    fn run_path(&self) -> Option<&Path>;

    /// Directory that holds every experiment, for filesystem-backed stores.
    fn root(&self) -> Option<&Path> {
        None
    }
}

/// Output store on the local filesystem.
///
/// Layout: `<root>/<experiment>/<run_id>/{metadata,artifacts}/`.
#[derive(Debug)]
pub struct LocalOutputStore {
    root: PathBuf,
    run_path: Option<PathBuf>,
    counters: HashMap<MetadataKind, usize>,
}

impl LocalOutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            run_path: None,
            counters: HashMap::new(),
        }
    }

    fn run_dir(&self) -> Result<&Path, StoreError> {
        self.run_path
            .as_deref()
            .ok_or_else(|| StoreError::access("local", "run directory not initialized"))
    }

    fn next_name(&mut self, kind: MetadataKind) -> String {
        if kind.is_singleton() {
            return format!("{}.json", kind.as_str());
        }
        let n = self.counters.entry(kind).or_insert(0);
        let name = format!("{}_{}.json", kind.as_str(), n);
        *n += 1;
        name
    }
}

impl OutputStore for LocalOutputStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn init_run(
        &mut self,
        experiment: &str,
        run_id: &str,
        overwrite: bool,
    ) -> Result<(), crate::Error> {
        let path = self.root.join(experiment).join(run_id);
        if path.exists() {
            if !overwrite {
                return Err(RunError::RunAlreadyExists { path }.into());
            }
            std::fs::remove_dir_all(&path).map_err(StoreError::from)?;
        }
        std::fs::create_dir_all(path.join("metadata")).map_err(StoreError::from)?;
        std::fs::create_dir_all(path.join("artifacts")).map_err(StoreError::from)?;
        tracing::debug!(store = self.kind(), path = %path.display(), "initialized run directory");
        self.run_path = Some(path);
        self.counters.clear();
        Ok(())
    }

    fn log_metadata(
        &mut self,
        value: &serde_json::Value,
        kind: MetadataKind,
    ) -> Result<Option<String>, StoreError> {
        let dir = self.run_dir()?.join("metadata");
        let path = dir.join(self.next_name(kind));
        std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        Ok(Some(path.to_string_lossy().into_owned()))
    }

    fn persist_artifact(
        &mut self,
        object: &ArtifactObject,
        filename: &str,
    ) -> Result<Option<String>, StoreError> {
        let path = self.run_dir()?.join("artifacts").join(filename);
        match object {
            ArtifactObject::Path(source) => {
                if !source.exists() {
                    return Err(StoreError::UnsupportedArtifact(format!(
                        "path does not exist: {}",
                        source.display()
                    )));
                }
                copy_path(source, &path)?;
            }
            ArtifactObject::Json(value) => {
                if !(value.is_object() || value.is_array()) {
                    return Err(StoreError::UnsupportedArtifact(format!(
                        "'{filename}' is a JSON scalar, expected an object or array"
                    )));
                }
                std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
            }
            ArtifactObject::Bytes(bytes) => std::fs::write(&path, bytes)?,
            ArtifactObject::Text(text) => std::fs::write(&path, text)?,
        }
        Ok(Some(path.to_string_lossy().into_owned()))
    }

    fn run_path(&self) -> Option<&Path> {
        self.run_path.as_deref()
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Output store that discards everything.
#[derive(Debug, Default)]
pub struct DummyOutputStore;

impl OutputStore for DummyOutputStore {
    fn kind(&self) -> &'static str {
        "dummy"
    }

    fn is_dummy(&self) -> bool {
        true
    }

    fn init_run(&mut self, _: &str, _: &str, _: bool) -> Result<(), crate::Error> {
        Ok(())
    }

    fn log_metadata(
        &mut self,
        _: &serde_json::Value,
        _: MetadataKind,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn persist_artifact(
        &mut self,
        _: &ArtifactObject,
        _: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn run_path(&self) -> Option<&Path> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, LocalOutputStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalOutputStore::new(dir.path());
        store.init_run("exp", "run-1", false).unwrap();
        (dir, store)
    }

    #[test]
    fn test_run_layout() {
        let (dir, store) = store();
        let run = dir.path().join("exp/run-1");
        assert_eq!(store.run_path(), Some(run.as_path()));
        assert!(run.join("metadata").is_dir());
        assert!(run.join("artifacts").is_dir());
    }

    #[test]
    fn test_existing_run_requires_overwrite() {
        let (dir, _) = store();
        let mut again = LocalOutputStore::new(dir.path());
        assert!(matches!(
            again.init_run("exp", "run-1", false),
            Err(crate::Error::Run(RunError::RunAlreadyExists { .. }))
        ));
        assert!(again.init_run("exp", "run-1", true).is_ok());
    }

    #[test]
    fn test_metadata_numbering() {
        let (dir, mut store) = store();
        store.log_metadata(&json!({"a": 1}), MetadataKind::Report).unwrap();
        store.log_metadata(&json!({"a": 2}), MetadataKind::Report).unwrap();
        store.log_metadata(&json!({"s": 1}), MetadataKind::Run).unwrap();
        store.log_metadata(&json!({"s": 2}), MetadataKind::Run).unwrap();

        let meta = dir.path().join("exp/run-1/metadata");
        assert!(meta.join("report_0.json").is_file());
        assert!(meta.join("report_1.json").is_file());
        let run: serde_json::Value =
            serde_json::from_slice(&std::fs::read(meta.join("run.json")).unwrap()).unwrap();
        assert_eq!(run["s"], 2);
    }

    #[test]
    fn test_json_scalar_artifact_rejected() {
        let (_dir, mut store) = store();
        assert!(matches!(
            store.persist_artifact(&ArtifactObject::Json(json!(3)), "x.json"),
            Err(StoreError::UnsupportedArtifact(_))
        ));
    }

    #[test]
    fn test_persist_path_artifact() {
        let (dir, mut store) = store();
        let source = dir.path().join("data.csv");
        std::fs::write(&source, "a\n1\n").unwrap();

        store
            .persist_artifact(&ArtifactObject::Path(source), "data_0.csv")
            .unwrap();
        assert!(dir.path().join("exp/run-1/artifacts/data_0.csv").is_file());
    }

    #[test]
    fn test_uninitialized_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalOutputStore::new(dir.path());
        assert!(store
            .log_metadata(&json!({}), MetadataKind::Run)
            .is_err());
    }
}
