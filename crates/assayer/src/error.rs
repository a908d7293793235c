//! Error taxonomy.
//!
//! Fatal setup failures travel as [`Error`]. Failures inside a plugin stage are
//! [`PluginError`]s and never leave the plugin: they are captured into the
//! stage's [`StageResult`](crate::StageResult).

use crate::operation::Operation;
use crate::run::RunStatus;
use std::path::PathBuf;

/// Top-level error for setup and lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("library '{library}' is not registered for {operation}")]
    NotImplemented { operation: Operation, library: String },

    #[error("run interrupted")]
    Interrupted,
}

/// Malformed store or run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("duplicate store name: {0}")]
    DuplicateStore(String),

    #[error("more than one default store: '{0}' and '{1}'")]
    MultipleDefaultStores(String, String),

    #[error("store '{store}' is missing required field '{field}'")]
    MissingField { store: String, field: &'static str },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Store resolution or backend access failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store not found: {0}")]
    NotFound(String),

    #[error("resource '{locator}' not found in store '{store}'")]
    ResourceNotFound { store: String, locator: String },

    #[error("cannot access store '{store}': {message}")]
    Access { store: String, message: String },

    #[error("store '{0}' holds no data")]
    Empty(String),

    #[error("content type '{content_type}' of '{locator}' is not allowed")]
    ContentType {
        locator: String,
        content_type: String,
    },

    #[error("store type '{0}' is not enabled in this build")]
    Unsupported(String),

    #[error("unsupported artifact: {0}")]
    UnsupportedArtifact(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn access(store: &str, message: impl ToString) -> Self {
        StoreError::Access {
            store: store.to_string(),
            message: message.to_string(),
        }
    }
}

/// Lifecycle misuse.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("run already exists at {}, use overwrite to replace it", path.display())]
    RunAlreadyExists { path: PathBuf },

    #[error("invalid error report mode '{0}', expected one of: count, partial, full")]
    InvalidErrorReport(String),

    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),

    #[error("metadata store is not configured")]
    MetadataStoreNotConfigured,

    #[error("run is {actual}, expected {expected}")]
    InvalidState {
        expected: RunStatus,
        actual: RunStatus,
    },
}

/// Failure inside a plugin stage. Always captured, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("operation failed: {0}")]
    Failed(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("operation stage failed, nothing to render")]
    OperationFailed,

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("plugin cannot run in an isolated worker: {0}")]
    NotIsolatable(String),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "parquet")]
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "parquet")]
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}
