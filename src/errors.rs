//! Typed error hierarchy for the anvil engine.
//!
//! One enum per subsystem:
//! - `ParseError`: malformed spec documents (fatal, no partial graph)
//! - `CycleError`: dependency cycles (fatal, carries the exact path)
//! - `WorkerError`: failures of the external worker capability
//! - `StoreError`: persistence failures (always fatal)
//! - `WorktreeError`: worktree creation and merge failures
//! - `OrchestratorError`: everything that stops a run outright

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::worktree::MergeConflict;

/// Errors raised while turning spec text into a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Spec is not a valid document: {message}")]
    Syntax { message: String },

    #[error("{context} is missing required field '{field}'")]
    MissingField { context: String, field: String },

    #[error("Unknown dependency '{dependency}' in component '{component}': no component with that id exists")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    #[error("Duplicate component id: {id}")]
    DuplicateId { id: String },

    #[error("Component '{id}' depends on itself")]
    SelfDependency { id: String },

    #[error("Invalid value for '{field}' in {context}: {message}")]
    InvalidValue {
        context: String,
        field: String,
        message: String,
    },
}

/// A dependency cycle, reported with the exact path back to the repeated node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in component dependencies: {}", .path.join(" -> "))]
pub struct CycleError {
    pub path: Vec<String>,
}

/// Failures of a single worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Worker returned unreadable output: {message}")]
    InvalidOutput { message: String },

    #[error("Worker unavailable: {0}")]
    Unavailable(String),
}

/// Persistence failures. The engine never proceeds past one of these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Working directory {path} is not writable: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Checkpoint {checkpoint_id} not found in task {task_id}")]
    CheckpointNotFound {
        task_id: String,
        checkpoint_id: String,
    },

    #[error("Failed to read state log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State log {path} is corrupt at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to serialize state entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Worktree lifecycle and merge failures.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Worktree I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worktree '{name}' already exists for task {task_id}")]
    AlreadyExists { task_id: String, name: String },

    #[error("No worktree is registered at {path}")]
    UnknownWorktree { path: PathBuf },

    #[error("Selected worktree {path} is not among the merge candidates")]
    NotACandidate { path: PathBuf },

    #[error("Base repository has no commit to branch from")]
    NoBaseCommit,

    #[error("Merge conflict in {} worktree(s)", .conflicts.len())]
    Conflict { conflicts: Vec<MergeConflict> },
}

/// Errors that stop a run before it can reach Complete or Blocked.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error("Git tracker error: {0}")]
    GitTracker(String),

    #[error("Invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Spec for task {task_id} changed since it was created (expected {expected}, found {actual})")]
    SpecChanged {
        task_id: String,
        expected: String,
        actual: String,
    },

    #[error("Execution unit for '{component}' failed to join: {message}")]
    UnitJoin { component: String, message: String },
}

impl OrchestratorError {
    /// Process exit code for a run that ended with this error.
    ///
    /// Every variant is a fatal configuration, parse, or persistence failure.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_renders_full_path() {
        let err = CycleError {
            path: vec!["A".into(), "B".into(), "C".into(), "A".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cycle detected in component dependencies: A -> B -> C -> A"
        );
    }

    #[test]
    fn parse_error_unknown_dependency_names_both_ids() {
        let err = ParseError::UnknownDependency {
            component: "api".into(),
            dependency: "db".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("api"));
        assert!(msg.contains("db"));
    }

    #[test]
    fn store_error_task_not_found_is_matchable() {
        let err = StoreError::TaskNotFound {
            task_id: "t-1".into(),
        };
        match &err {
            StoreError::TaskNotFound { task_id } => assert_eq!(task_id, "t-1"),
            _ => panic!("Expected TaskNotFound"),
        }
    }

    #[test]
    fn orchestrator_error_converts_from_cycle_error() {
        let err: OrchestratorError = CycleError {
            path: vec!["A".into(), "A".into()],
        }
        .into();
        assert!(matches!(err, OrchestratorError::Cycle(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn store_errors_are_fatal() {
        let err: OrchestratorError = StoreError::TaskNotFound {
            task_id: "x".into(),
        }
        .into();
        assert!(err.to_string().contains("x"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ParseError::DuplicateId { id: "a".into() });
        assert_std_error(&CycleError { path: vec![] });
        assert_std_error(&WorkerError::Timeout(Duration::from_secs(1)));
        assert_std_error(&WorktreeError::NoBaseCommit);
        assert_std_error(&OrchestratorError::GitTracker("x".into()));
    }
}
