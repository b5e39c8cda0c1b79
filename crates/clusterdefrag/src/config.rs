//! Planner configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, PlannerResult};

/// Tunables shared by the placement strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Files larger than this many clusters are handled by the large-file strategy.
    pub large_file_threshold: u64,
    /// Upper bound on move attempts in one strategy invocation.
    pub max_moves_per_run: usize,
    /// Failed moves of one file within the current gap before the
    /// free-space sweep stops offering it.
    pub failures_before_ignore: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: 1024,
            max_moves_per_run: 100_000,
            failures_before_ignore: 1,
        }
    }
}

impl PlannerConfig {
    /// Load a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> PlannerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| PlannerError::Config {
                reason: e.to_string(),
            }),
            "json" => serde_json::from_str(&contents).map_err(|e| PlannerError::Config {
                reason: e.to_string(),
            }),
            _ => Err(PlannerError::Config {
                reason: format!("Unsupported config file extension: {}", ext),
            }),
        }
    }
}
