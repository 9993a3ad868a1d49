//! Configuration loading from rankbench.toml
//!
//! Optional file-based defaults, discovered by walking up from the current
//! directory. Explicit command-line flags always win over file values.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// rankbench configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RankbenchConfig {
    /// Runner configuration.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Workload defaults.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// Runner configuration for challenger execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Run each challenger in an isolated worker process.
    #[serde(default = "default_isolated")]
    pub isolated: bool,
    /// Per-stage wall-clock deadline in seconds; a stalled stage counts as
    /// a crash.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            isolated: default_isolated(),
            stage_timeout_secs: default_stage_timeout(),
        }
    }
}

fn default_isolated() -> bool {
    true
}
fn default_stage_timeout() -> u64 {
    300
}

/// Workload size defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Point count.
    #[serde(default = "default_points")]
    pub points: u32,
    /// Query count.
    #[serde(default = "default_queries")]
    pub queries: u32,
    /// Result count (top-k per query).
    #[serde(default = "default_results")]
    pub results: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            queries: default_queries(),
            results: default_results(),
        }
    }
}

fn default_points() -> u32 {
    10_000_000
}
fn default_queries() -> u32 {
    1_000
}
fn default_results() -> u32 {
    20
}

impl RankbenchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Discover `rankbench.toml` by walking up from the current directory.
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("rankbench.toml");
            if config_path.exists() {
                return Self::load(&config_path).ok();
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RankbenchConfig::default();
        assert!(config.runner.isolated);
        assert_eq!(config.runner.stage_timeout_secs, 300);
        assert_eq!(config.workload.points, 10_000_000);
        assert_eq!(config.workload.queries, 1_000);
        assert_eq!(config.workload.results, 20);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
            [runner]
            isolated = false

            [workload]
            points = 5000
        "#;

        let config: RankbenchConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.runner.isolated);
        assert_eq!(config.workload.points, 5000);
        // Untouched fields fall back to defaults.
        assert_eq!(config.runner.stage_timeout_secs, 300);
        assert_eq!(config.workload.results, 20);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: RankbenchConfig = toml::from_str("").unwrap();
        assert!(config.runner.isolated);
        assert_eq!(config.workload.queries, 1_000);
    }
}
