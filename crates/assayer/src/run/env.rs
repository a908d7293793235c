use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host environment of a run, logged as `run_env.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub parallelism: usize,
    pub assayer_version: String,
    #[serde(default)]
    pub current_dir: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    pub captured: DateTime<Utc>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            parallelism: crate::config::default_num_worker(),
            assayer_version: env!("CARGO_PKG_VERSION").to_string(),
            current_dir: std::env::current_dir()
                .ok()
                .map(|p| p.to_string_lossy().into_owned()),
            hostname: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .ok(),
            captured: Utc::now(),
        }
    }
}
