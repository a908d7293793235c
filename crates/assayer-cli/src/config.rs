//! User defaults file.

use serde::Deserialize;
use std::path::PathBuf;

/// Contents of `~/.config/assayer/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
}

/// Default CLI options. Flags on the command line win.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Defaults {
    /// Log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Run thread and process lanes in parallel.
    pub parallel: Option<bool>,
    /// Worker count for the parallel lanes.
    pub num_worker: Option<usize>,
    /// Root directory for run outputs when a project names no metadata store.
    pub output_root: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            log_level: "warn".into(),
            parallel: None,
            num_worker: None,
            output_root: None,
        }
    }
}

impl Config {
    /// Load config from the default location (~/.config/assayer/config.toml).
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load config from a specific path. Missing or invalid files fall back to
    /// the defaults with a warning.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("assayer").join("config.toml"))
    }
}
