//! Escalation records emitted when a run becomes Blocked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::issues::{Issue, Severity, group_by_severity};
use crate::retry::RetryAttempt;

/// Which gate gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    Validation,
    Tests,
    Merge,
    Integration,
}

impl fmt::Display for EscalationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Tests => "tests",
            Self::Merge => "merge",
            Self::Integration => "integration",
        };
        write!(f, "{}", s)
    }
}

/// Everything a human needs to unblock a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub task_id: String,
    /// Component that blocked, or the task itself for integration
    pub component_id: String,
    pub stage: EscalationStage,
    pub issues: BTreeMap<Severity, Vec<Issue>>,
    #[serde(default)]
    pub attempts: Vec<RetryAttempt>,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(
        task_id: &str,
        component_id: &str,
        stage: EscalationStage,
        issues: Vec<Issue>,
        attempts: Vec<RetryAttempt>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            component_id: component_id.to_string(),
            stage,
            issues: group_by_severity(&issues),
            attempts,
            options: resolution_options(stage, component_id),
            created_at: Utc::now(),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.issues.values().map(Vec::len).sum()
    }

    /// Multi-line report for terminal output.
    pub fn render(&self) -> String {
        let mut out = format!(
            "BLOCKED: {} stage for '{}' (task {})\n",
            self.stage, self.component_id, self.task_id
        );
        if !self.attempts.is_empty() {
            out.push_str(&format!("  {} remediation attempt(s) made\n", self.attempts.len()));
        }
        for (severity, issues) in &self.issues {
            out.push_str(&format!("  {} ({}):\n", severity, issues.len()));
            for issue in issues {
                out.push_str(&format!("    - {}\n", issue));
            }
        }
        out.push_str("  Options:\n");
        for (i, option) in self.options.iter().enumerate() {
            out.push_str(&format!("    {}. {}\n", i + 1, option));
        }
        out
    }
}

/// Spec metadata outranks anvil.toml, and a spec edit rules out resuming.
const RAISE_ATTEMPTS: &str = "Raise max_attempts in anvil.toml and resume the task \
     (when the spec metadata sets max_attempts, raise it there and start a new task)";

fn resolution_options(stage: EscalationStage, component_id: &str) -> Vec<String> {
    match stage {
        EscalationStage::Validation => vec![
            format!("Fix the reported issues in '{}' by hand, then resume the task", component_id),
            format!("Simplify the purpose of '{}' in the spec and start a new task", component_id),
            RAISE_ATTEMPTS.to_string(),
        ],
        EscalationStage::Tests => vec![
            format!("Fix the failing tests for '{}' by hand, then resume the task", component_id),
            "Lower coverage_target in the spec metadata and start a new task".to_string(),
            RAISE_ATTEMPTS.to_string(),
        ],
        EscalationStage::Merge => vec![
            "Resolve the conflicting files in the base tree, then resume the task".to_string(),
            "Resume with --no-parallel so the level runs sequentially".to_string(),
        ],
        EscalationStage::Integration => vec![
            "Fix the integration issues by hand, then resume the task".to_string(),
            "Roll back to an earlier checkpoint and resume".to_string(),
        ],
    }
}
