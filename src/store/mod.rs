//! Durable task state.
//!
//! Every orchestration decision is made on state read back from the store;
//! nothing is trusted to still be in memory across a restart. The store is
//! written by the orchestrator alone.
//!
//! ## Example
//!
//! ```no_run
//! use anvil::store::{FileStateStore, PhaseResult, StateStore};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), anvil::errors::StoreError> {
//! let store = FileStateStore::new(".anvil");
//! let task_id = store.create_task("build the api", Path::new("."))?;
//!
//! store.save_phase_result(&task_id, "db", &PhaseResult::passed("db", Duration::from_secs(4)))?;
//! let checkpoint = store.create_checkpoint(&task_id, "after db", None)?;
//!
//! let state = store.get_state(&task_id)?;
//! assert_eq!(state.completed, vec!["db".to_string()]);
//! store.rollback(&task_id, &checkpoint)?;
//! # Ok(())
//! # }
//! ```

mod file;
mod types;

pub use file::FileStateStore;
pub use types::{Checkpoint, PhaseResult, Position, TaskState};

use crate::errors::StoreError;
use crate::orchestrator::Escalation;
use std::path::Path;

/// Durable, single-writer task state.
///
/// Implementations must make every write durable before returning.
pub trait StateStore: Send + Sync {
    /// Initialize an empty task. Fails if `working_dir` is not writable.
    fn create_task(&self, description: &str, working_dir: &Path) -> Result<String, StoreError>;

    /// Full current state of a task, read from durable storage.
    fn get_state(&self, task_id: &str) -> Result<TaskState, StoreError>;

    /// Bind a task to the hash of the spec it executes.
    fn bind_spec(&self, task_id: &str, spec_hash: &str) -> Result<(), StoreError>;

    /// Move the position pointer to a component about to start.
    fn mark_started(&self, task_id: &str, component_id: &str, level: usize)
    -> Result<(), StoreError>;

    /// Append a result. The component enters the completed set only on success.
    fn save_phase_result(
        &self,
        task_id: &str,
        component_id: &str,
        result: &PhaseResult,
    ) -> Result<(), StoreError>;

    /// Record a named snapshot point tied to the current completed set.
    fn create_checkpoint(
        &self,
        task_id: &str,
        label: &str,
        snapshot: Option<String>,
    ) -> Result<String, StoreError>;

    /// Return the task to the state it had when the checkpoint was created.
    fn rollback(&self, task_id: &str, checkpoint_id: &str) -> Result<(), StoreError>;

    fn record_escalation(&self, task_id: &str, escalation: &Escalation) -> Result<(), StoreError>;

    fn mark_finished(&self, task_id: &str) -> Result<(), StoreError>;

    /// Ids of every known task, sorted.
    fn list_tasks(&self) -> Result<Vec<String>, StoreError>;
}
