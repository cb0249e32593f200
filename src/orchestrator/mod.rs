//! Task execution: the per-component gate pipeline and the level driver.
//!
//! [`Orchestrator`] walks the execution plan level by level. Each component
//! runs through [`run_component`] (implement, validate, write tests, test),
//! either in the base directory or in its own worktree when a level can fan
//! out. Only the orchestrator writes to the [`StateStore`](crate::store::StateStore).

mod escalation;
mod pipeline;
mod runner;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use escalation::{Escalation, EscalationStage};
pub use pipeline::{GateSettings, UnitContext, UnitReport, UnitStatus, run_component};
pub use runner::{INTEGRATION_SCOPE, Orchestrator, RunOptions, RunOutcome};
pub use state::{PhaseHistoryEntry, RunPhase, RunState};
