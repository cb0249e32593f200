//! Severity-tagged issues produced by checks, reviews, tests and workers.
//!
//! ## Example
//!
//! ```
//! use anvil::issues::{Issue, IssueOrigin, Severity};
//!
//! let issue = Issue::new(Severity::Critical, IssueOrigin::StaticCheck, "unresolved import")
//!     .with_file("src/api.rs");
//! assert!(issue.severity.is_critical());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::WorkerError;

/// Severity level of an issue, ordered from most to least severe.
///
/// Every severity blocks a retry loop from reaching Clean; the ordering only
/// drives reporting.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    #[default]
    Important,
    Minor,
}

impl Severity {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Important => "important",
            Self::Minor => "minor",
        };
        write!(f, "{}", s)
    }
}

/// Where an issue came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueOrigin {
    #[default]
    StaticCheck,
    Review,
    Test,
    Coverage,
    Worker,
    Merge,
    Integration,
}

impl fmt::Display for IssueOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StaticCheck => "static_check",
            Self::Review => "review",
            Self::Test => "test",
            Self::Coverage => "coverage",
            Self::Worker => "worker",
            Self::Merge => "merge",
            Self::Integration => "integration",
        };
        write!(f, "{}", s)
    }
}

/// A single issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub origin: IssueOrigin,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, origin: IssueOrigin, message: impl Into<String>) -> Self {
        Self {
            severity,
            origin,
            message: message.into(),
            file: None,
        }
    }

    pub fn critical(origin: IssueOrigin, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, origin, message)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// A failed worker call, fed into the retry loop as a critical issue.
    pub fn from_worker_error(error: &WorkerError) -> Self {
        Self::critical(IssueOrigin::Worker, error.to_string())
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "[{}] {} ({}): {}",
                self.severity, self.origin, file, self.message
            ),
            None => write!(f, "[{}] {}: {}", self.severity, self.origin, self.message),
        }
    }
}

/// Per-severity counts, as rolled up into phase results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    #[serde(default)]
    pub critical: usize,
    #[serde(default)]
    pub important: usize,
    #[serde(default)]
    pub minor: usize,
}

impl IssueCounts {
    pub fn from_issues<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            counts.add(issue.severity);
        }
        counts
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Important => self.important += 1,
            Severity::Minor => self.minor += 1,
        }
    }

    pub fn merge(&mut self, other: &IssueCounts) {
        self.critical += other.critical;
        self.important += other.important;
        self.minor += other.minor;
    }

    pub fn total(&self) -> usize {
        self.critical + self.important + self.minor
    }
}

/// Group issues by severity, most severe first.
pub fn group_by_severity(issues: &[Issue]) -> BTreeMap<Severity, Vec<Issue>> {
    let mut grouped: BTreeMap<Severity, Vec<Issue>> = BTreeMap::new();
    for issue in issues {
        grouped.entry(issue.severity).or_default().push(issue.clone());
    }
    grouped
}
