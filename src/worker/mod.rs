//! The worker capability.
//!
//! Code generation, review and test execution are black boxes behind the
//! [`Worker`] trait. The orchestrator only ever sees a [`WorkerOutput`] or a
//! [`WorkerError`]; workers never touch orchestrator state.

mod command;

pub use command::{CommandWorker, resolve_command};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::component::Component;
use crate::errors::WorkerError;
use crate::issues::Issue;
use crate::worktree::VariantMetrics;

/// What a worker is being asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    Implement,
    Fix,
    StaticCheck,
    Review { reviewer: u32 },
    WriteTests,
    RunTests,
    FixTests,
    Integrate,
    FixIntegration,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implement => write!(f, "implement"),
            Self::Fix => write!(f, "fix"),
            Self::StaticCheck => write!(f, "static_check"),
            Self::Review { reviewer } => write!(f, "review#{}", reviewer),
            Self::WriteTests => write!(f, "write_tests"),
            Self::RunTests => write!(f, "run_tests"),
            Self::FixTests => write!(f, "fix_tests"),
            Self::Integrate => write!(f, "integrate"),
            Self::FixIntegration => write!(f, "fix_integration"),
        }
    }
}

/// A single request to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Absent for whole-task requests such as integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    pub working_dir: PathBuf,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Issues a fix request should address
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl TaskSpec {
    pub fn for_component(kind: TaskKind, component: &Component, working_dir: PathBuf) -> Self {
        Self {
            kind,
            component: Some(component.clone()),
            working_dir,
            attempt: 0,
            variant: None,
            issues: Vec::new(),
        }
    }

    pub fn for_task(kind: TaskKind, working_dir: PathBuf) -> Self {
        Self {
            kind,
            component: None,
            working_dir,
            attempt: 0,
            variant: None,
            issues: Vec::new(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_variant(mut self, variant: Option<String>) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_issues(mut self, issues: &[Issue]) -> Self {
        self.issues = issues.to_vec();
        self
    }

    pub fn component_id(&self) -> Option<&str> {
        self.component.as_ref().map(|c| c.id.as_str())
    }
}

/// Result of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    /// Line coverage in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    /// Names or messages of failing tests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// What a worker hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub discoveries: Vec<String>,
    #[serde(default)]
    pub files_touched: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_report: Option<TestReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<VariantMetrics>,
}

#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, task: TaskSpec) -> Result<WorkerOutput, WorkerError>;
}
