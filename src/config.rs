//! Project configuration.
//!
//! Settings come from three layers, later ones winning:
//! 1. `anvil.toml` in the project directory
//! 2. Environment variables (`ANVIL_WORKER_CMD`)
//! 3. CLI flags
//!
//! Spec metadata then overrides `[defaults]` per task.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::{GateSettings, RunOptions};
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::util::state_dir;

pub const CONFIG_FILE: &str = "anvil.toml";
pub const WORKER_CMD_ENV: &str = "ANVIL_WORKER_CMD";

/// Gate defaults for every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Minimum line coverage percent; omit to disable the coverage check
    #[serde(default = "default_coverage_target")]
    pub coverage_target: Option<f64>,
    #[serde(default = "default_reviewer_count")]
    pub reviewer_count: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_coverage_target() -> Option<f64> {
    Some(80.0)
}

fn default_reviewer_count() -> u32 {
    1
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            coverage_target: default_coverage_target(),
            reviewer_count: default_reviewer_count(),
        }
    }
}

/// Level scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Seconds in-flight units get to finish after Ctrl-C
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_parallel() -> bool {
    true
}

fn default_max_parallel() -> usize {
    4
}

fn default_cancel_grace_secs() -> u64 {
    30
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            max_parallel: default_max_parallel(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

/// External worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    900
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The complete anvil.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnvilToml {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl AnvilToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse anvil.toml")
    }

    /// Load `anvil.toml` from `project_dir`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Worker command: file, then environment, then the default.
    pub fn worker_cmd(&self) -> String {
        std::env::var(WORKER_CMD_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.worker.command.clone())
            .unwrap_or_else(|| "anvil-worker".to_string())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(target) = self.defaults.coverage_target
            && !(0.0..=100.0).contains(&target)
        {
            warnings.push(format!(
                "coverage_target {} is outside 0..=100 and will never be met",
                target
            ));
        }
        if self.defaults.max_attempts == 0 {
            warnings.push("max_attempts = 0 is treated as 1".to_string());
        }
        if self.execution.max_parallel == 0 {
            warnings.push("max_parallel = 0 is treated as 1".to_string());
        }
        if self.worker.timeout_secs == 0 {
            warnings.push("worker.timeout_secs = 0 makes every worker call time out".to_string());
        }
        warnings
    }
}

/// Configuration resolved for one invocation.
#[derive(Debug, Clone)]
pub struct AnvilConfig {
    pub project_dir: PathBuf,
    pub toml: AnvilToml,
    /// CLI override: run every level sequentially
    pub no_parallel: bool,
}

impl AnvilConfig {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;
        let toml = AnvilToml::load_or_default(&project_dir)?;
        Ok(Self {
            project_dir,
            toml,
            no_parallel: false,
        })
    }

    pub fn with_no_parallel(mut self, no_parallel: bool) -> Self {
        self.no_parallel = no_parallel;
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        state_dir(&self.project_dir)
    }

    pub fn worker_cmd(&self) -> String {
        self.toml.worker_cmd()
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.worker.timeout_secs)
    }

    pub fn gates(&self) -> GateSettings {
        GateSettings {
            max_attempts: self.toml.defaults.max_attempts.max(1),
            coverage_target: self.toml.defaults.coverage_target,
            reviewer_count: self.toml.defaults.reviewer_count,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            gates: self.gates(),
            parallel: self.toml.execution.parallel && !self.no_parallel,
            max_parallel: self.toml.execution.max_parallel.max(1),
            cancel_grace: Duration::from_secs(self.toml.execution.cancel_grace_secs),
            ..RunOptions::default()
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let config = AnvilConfig::new(dir.path()).unwrap();

        let gates = config.gates();
        assert_eq!(gates.max_attempts, 3);
        assert_eq!(gates.coverage_target, Some(80.0));
        assert_eq!(gates.reviewer_count, 1);

        let options = config.run_options();
        assert!(options.parallel);
        assert_eq!(options.max_parallel, 4);
        assert_eq!(options.cancel_grace, Duration::from_secs(30));
        assert_eq!(config.worker_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[defaults]\nmax_attempts = 5\n\n[worker]\ncommand = \"./worker.sh\"\nargs = [\"--fast\"]\n",
        )
        .unwrap();

        let config = AnvilConfig::new(dir.path()).unwrap();
        assert_eq!(config.gates().max_attempts, 5);
        assert_eq!(config.gates().coverage_target, Some(80.0));
        assert_eq!(config.toml.worker.command.as_deref(), Some("./worker.sh"));
        assert_eq!(config.toml.worker.args, vec!["--fast"]);
        assert_eq!(config.toml.worker.timeout_secs, 900);
    }

    #[test]
    fn test_no_parallel_flag_wins_over_file() {
        let dir = tempdir().unwrap();
        let config = AnvilConfig::new(dir.path()).unwrap().with_no_parallel(true);
        assert!(!config.run_options().parallel);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = AnvilToml::parse("[defaults\nmax_attempts = ").unwrap_err();
        assert!(format!("{:#}", err).contains("anvil.toml"));
    }

    #[test]
    fn test_validate_warnings() {
        let toml = AnvilToml::parse(
            "[defaults]\ncoverage_target = 120.0\nmax_attempts = 0\n[execution]\nmax_parallel = 0\n",
        )
        .unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(AnvilToml::default().validate().is_empty());
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[defaults]\nmax_attempts = 0\n[execution]\nmax_parallel = 0\n",
        )
        .unwrap();
        let config = AnvilConfig::new(dir.path()).unwrap();
        assert_eq!(config.gates().max_attempts, 1);
        assert_eq!(config.run_options().max_parallel, 1);
    }
}
