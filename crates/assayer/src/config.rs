//! Run and project configuration.
//!
//! A project file describes a whole run: stores, resources, which libraries
//! run each operation, constraints and metrics. Project files are YAML, TOML
//! or JSON, picked by extension.

use crate::error::{ConfigError, RunError};
use crate::executor::Isolation;
use crate::operation::{Constraint, ErrorReportMode, Metric, Operation};
use crate::resource::{Resource, StoreParameters, validate_stores};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One library configured for an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecConfig {
    pub library: String,
    /// Library-specific arguments, passed through to plugins.
    #[serde(default)]
    pub exec_args: IndexMap<String, serde_json::Value>,
}

impl ExecConfig {
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            exec_args: IndexMap::new(),
        }
    }

    /// Set an exec argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.exec_args.insert(key.into(), value.into());
        self
    }
}

/// Which libraries run each operation, and how wide the lanes are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub inference: Vec<ExecConfig>,
    #[serde(default)]
    pub validation: Vec<ExecConfig>,
    #[serde(default)]
    pub profiling: Vec<ExecConfig>,
    #[serde(default)]
    pub metric: Vec<ExecConfig>,
    /// When false, every plugin runs in the sequential lane.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Width of the thread and process lanes.
    #[serde(default = "default_num_worker")]
    pub num_worker: usize,
    #[serde(default)]
    pub isolation: Isolation,
}

fn default_parallel() -> bool {
    true
}

/// Available parallelism, or 1.
pub fn default_num_worker() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            inference: Vec::new(),
            validation: Vec::new(),
            profiling: Vec::new(),
            metric: Vec::new(),
            parallel: default_parallel(),
            num_worker: default_num_worker(),
            isolation: Isolation::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured libraries of `operation`, in order.
    pub fn exec_configs(&self, operation: Operation) -> &[ExecConfig] {
        match operation {
            Operation::Inference => &self.inference,
            Operation::Validation => &self.validation,
            Operation::Profiling => &self.profiling,
            Operation::Metric => &self.metric,
        }
    }

    /// Append a library to `operation`.
    pub fn with(mut self, operation: Operation, exec: ExecConfig) -> Self {
        match operation {
            Operation::Inference => self.inference.push(exec),
            Operation::Validation => self.validation.push(exec),
            Operation::Profiling => self.profiling.push(exec),
            Operation::Metric => self.metric.push(exec),
        }
        self
    }

    /// Set the parallel flag.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the lane width.
    pub fn num_worker(mut self, num_worker: usize) -> Self {
        self.num_worker = num_worker;
        self
    }

    /// Set the process-lane isolation.
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }
}

/// A complete run description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub experiment: String,
    /// Generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    /// Input stores.
    #[serde(default)]
    pub stores: Vec<StoreParameters>,
    /// Where run metadata goes. No metadata store means a dummy one.
    #[serde(default)]
    pub metadata_store: Option<StoreParameters>,
    /// Where artifacts go. Defaults to the metadata store.
    #[serde(default)]
    pub artifact_store: Option<StoreParameters>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default = "default_error_report")]
    pub error_report: String,
    /// Copy every input resource into the artifact store.
    #[serde(default)]
    pub persist_data: bool,
}

fn default_error_report() -> String {
    "partial".to_string()
}

impl ProjectConfig {
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
            run_id: None,
            overwrite: false,
            stores: Vec::new(),
            metadata_store: None,
            artifact_store: None,
            resources: Vec::new(),
            run: RunConfig::default(),
            constraints: Vec::new(),
            metrics: Vec::new(),
            error_report: default_error_report(),
            persist_data: false,
        }
    }

    /// Parse a project from bytes, detecting the format from `path`.
    /// Unknown or missing extensions are read as YAML.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, ConfigError> {
        let format = path.and_then(detect_format).unwrap_or("yaml");
        Self::from_bytes_format(data, format)
    }

    /// Parse a project from bytes in an explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, ConfigError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| ConfigError::Parse(format!("invalid UTF-8: {e}")))?;
                toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Serialize the project.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, ConfigError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(String::into_bytes)
                .map_err(|e| ConfigError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(String::into_bytes)
                .map_err(|e| ConfigError::Parse(e.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Parsed error report mode.
    pub fn error_report_mode(&self) -> Result<ErrorReportMode, RunError> {
        self.error_report.parse()
    }

    /// Static checks: store names unique, at most one default store,
    /// type-specific store fields present, a positive lane width.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_stores(&self.stores)?;
        for store in self.metadata_store.iter().chain(&self.artifact_store) {
            store.validate()?;
        }
        if self.run.num_worker == 0 {
            return Err(ConfigError::Invalid("num_worker must be at least 1".into()));
        }
        Ok(())
    }
}

/// Detect a configuration format from a file extension.
fn detect_format(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        _ => None,
    }
}
