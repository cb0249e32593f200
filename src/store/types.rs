//! Durable state types: task state, phase results and checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::issues::IssueCounts;
use crate::orchestrator::Escalation;

/// Result of executing a single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub component_id: String,
    /// Files the workers reported touching
    #[serde(default)]
    pub files_touched: Vec<PathBuf>,
    pub validation_passed: bool,
    pub tests_passed: bool,
    /// Issues seen across every check of both loops, by severity
    #[serde(default)]
    pub issues: IssueCounts,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub discoveries: Vec<String>,
    /// Remediation attempts used by the validation loop
    #[serde(default)]
    pub validation_attempts: u32,
    /// Remediation attempts used by the test loop
    #[serde(default)]
    pub test_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    /// Variant name when the result came from variant exploration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PhaseResult {
    /// An empty result for a component, not yet passing anything.
    pub fn new(component_id: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            files_touched: Vec::new(),
            validation_passed: false,
            tests_passed: false,
            issues: IssueCounts::default(),
            duration: Duration::ZERO,
            discoveries: Vec::new(),
            validation_attempts: 0,
            test_attempts: 0,
            coverage: None,
            artifact_ref: None,
            variant: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    /// A result that passed both gates.
    pub fn passed(component_id: &str, duration: Duration) -> Self {
        Self {
            validation_passed: true,
            tests_passed: true,
            duration,
            ..Self::new(component_id)
        }
    }

    pub fn failure(component_id: &str, error: &str, duration: Duration) -> Self {
        Self {
            error: Some(error.to_string()),
            duration,
            ..Self::new(component_id)
        }
    }

    /// Only successful results move a component into the completed set.
    pub fn is_success(&self) -> bool {
        self.validation_passed && self.tests_passed && self.error.is_none()
    }
}

/// A named snapshot point in a task's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub label: String,
    /// Line number of the checkpoint entry in the task log
    pub sequence: u64,
    /// Length of the completed set when the checkpoint was taken
    pub completed_len: usize,
    /// Filesystem tag (git commit id) captured with the checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The component currently being worked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub component_id: String,
    pub level: usize,
}

/// The full state of one orchestration run, rebuilt from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub description: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Hash of the spec text this task is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
    /// Completed component ids in commit order
    pub completed: Vec<String>,
    /// Latest result per component
    pub results: BTreeMap<String, PhaseResult>,
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn new(
        task_id: &str,
        description: &str,
        working_dir: PathBuf,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            description: description.to_string(),
            working_dir,
            created_at,
            spec_hash: None,
            completed: Vec::new(),
            results: BTreeMap::new(),
            checkpoints: Vec::new(),
            position: None,
            escalation: None,
            finished_at: None,
        }
    }

    pub fn is_completed(&self, component_id: &str) -> bool {
        self.completed.iter().any(|c| c == component_id)
    }

    pub fn checkpoint(&self, checkpoint_id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == checkpoint_id)
    }

    pub fn is_blocked(&self) -> bool {
        self.escalation.is_some()
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
