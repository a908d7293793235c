//! Assayer: run orchestration for data-quality operations
//!
//! Assayer runs batches of schema inference, validation, profiling and metric
//! plugins over named resources, isolates each plugin's failures in its own
//! result, and persists normalized reports and artifacts per run.

mod config;
mod error;
mod executor;
mod handler;
mod operation;
mod plugin;
mod reader;
mod registry;
mod report;
mod resource;
mod results;
pub mod run;
pub mod store;
pub mod worker;

pub use config::{ExecConfig, ProjectConfig, RunConfig, default_num_worker};
pub use error::{ConfigError, Error, PluginError, RunError, StoreError};
pub use executor::{
    Executor, Isolation, Lane, ProcessPoolExecutor, SequentialExecutor, ThreadPoolExecutor,
};
pub use handler::RunHandler;
pub use operation::{Constraint, ErrorReportMode, Metric, Operation, Payload};
pub use plugin::{
    Affinity, BuildParams, BuildRequest, Library, LibraryDecl, Plugin, PluginBuilder, PluginOutput,
    PluginSpec, StageResult, StageStatus, Target, run_stage,
};
pub use reader::{DataHandle, DataReader, ReaderKind, Table};
pub use registry::PluginRegistry;
pub use report::{
    ArtifactObject, ErrorSummary, Framework, MetricReport, NormalizedReport, ProfileReport,
    RenderedArtifact, SchemaField, SchemaReport, ValidationReport,
};
pub use resource::{
    Resource, ResourcePath, StoreKind, StoreParameters, check_unique_names, validate_stores,
};
pub use results::ResultRegistry;
pub use run::{ActiveRun, EnvSnapshot, PersistedArtifact, Run, RunBuilder, RunInfo, RunStatus};
pub use store::{InputStore, OutputStore, ResourceCache};
