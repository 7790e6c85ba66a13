//! Settings file for the `benchtop` binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings file read when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "benchtop.json";

/// Runtime settings. Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding lab, experiment and plugin definitions
    pub catalog_dir: PathBuf,
    /// Snapshot file of persisted experiments and tasks
    pub state_file: Option<PathBuf>,
    /// Delay between scheduler ticks
    pub tick_interval_ms: u64,
    /// Capacity of the cancellation queue
    pub cancellation_capacity: usize,
    /// Concurrent persistence sessions
    pub max_sessions: usize,
    /// Log filter, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Labs loaded at start-up
    pub labs: Vec<String>,
    /// Experiment types loaded at start-up
    pub experiments: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_dir: PathBuf::from("catalog"),
            state_file: Some(PathBuf::from(".benchtop/state.json")),
            tick_interval_ms: 1000,
            cancellation_capacity: 100,
            max_sessions: 16,
            log_filter: "info".to_string(),
            labs: Vec::new(),
            experiments: Vec::new(),
        }
    }
}

impl Settings {
    /// Read settings from `path`, or from [`DEFAULT_SETTINGS_FILE`] if it
    /// exists. Falls back to defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("invalid settings file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to read settings file {}", path.display()))
            }
        }
    }
}
