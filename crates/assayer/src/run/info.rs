use crate::config::RunConfig;
use crate::resource::{Resource, StoreParameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Running,
    Finished,
    Interrupted,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Interrupted => "INTERRUPTED",
            RunStatus::Error => "ERROR",
        }
    }

    /// True for FINISHED, INTERRUPTED and ERROR.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Finished | RunStatus::Interrupted | RunStatus::Error
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and state of a run, logged as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub experiment: String,
    pub run_id: String,
    pub status: RunStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub resources: Vec<Resource>,
    pub stores: Vec<StoreParameters>,
    /// Why the run ended in ERROR or INTERRUPTED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunInfo {
    pub fn new(
        experiment: impl Into<String>,
        run_id: impl Into<String>,
        config: RunConfig,
        resources: Vec<Resource>,
        stores: Vec<StoreParameters>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            run_id: run_id.into(),
            status: RunStatus::Created,
            created: Utc::now(),
            started: None,
            finished: None,
            config,
            resources,
            stores,
            error: None,
        }
    }

    /// Wall time between start and finish, in seconds.
    pub fn duration(&self) -> Option<f64> {
        let started = self.started?;
        let finished = self.finished?;
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }
}
