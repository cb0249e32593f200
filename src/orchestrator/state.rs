//! Run phase tracking with transition validation.
//!
//! Initializing -> Executing(level) -> Validating(component) -> Integrating -> Complete
//!
//! Blocked and Cancelled are reachable from every non-terminal phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Initializing,
    Executing { level: usize },
    Validating { component: String },
    Integrating,
    Complete,
    Blocked,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked | Self::Cancelled)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Executing { level } => write!(f, "executing(level {})", level),
            Self::Validating { component } => write!(f, "validating({})", component),
            Self::Integrating => write!(f, "integrating"),
            Self::Complete => write!(f, "complete"),
            Self::Blocked => write!(f, "blocked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: RunPhase,
    pub entered_at: DateTime<Utc>,
}

/// Current phase of a run plus every phase it has been through.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    phase: RunPhase,
    /// Level most recently entered
    level: Option<usize>,
    history: Vec<PhaseHistoryEntry>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Initializing,
            level: None,
            history: vec![PhaseHistoryEntry {
                phase: RunPhase::Initializing,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }

    pub fn can_transition(&self, target: &RunPhase) -> bool {
        use RunPhase::*;
        match (&self.phase, target) {
            (from, Blocked | Cancelled) => !from.is_terminal(),
            // A resumed run may start at any level
            (Initializing, Executing { .. }) => true,
            (Initializing, Integrating) => true,
            (Executing { level }, Executing { level: next }) => *next == level + 1,
            (Executing { .. }, Validating { .. }) => true,
            (Executing { .. }, Integrating) => true,
            (Validating { .. }, Validating { .. }) => true,
            (Validating { .. }, Executing { level: next }) => match self.level {
                Some(level) => *next == level || *next == level + 1,
                None => false,
            },
            (Validating { .. }, Integrating) => true,
            (Integrating, Complete) => true,
            _ => false,
        }
    }

    pub fn transition(&mut self, target: RunPhase) -> Result<(), OrchestratorError> {
        if !self.can_transition(&target) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        tracing::debug!(from = %self.phase, to = %target, "run phase transition");
        if let RunPhase::Executing { level } = target {
            self.level = Some(level);
        }
        self.phase = target.clone();
        self.history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validating(c: &str) -> RunPhase {
        RunPhase::Validating {
            component: c.to_string(),
        }
    }

    #[test]
    fn test_full_happy_path() {
        let mut state = RunState::new();
        state.transition(RunPhase::Executing { level: 0 }).unwrap();
        state.transition(validating("a")).unwrap();
        state.transition(RunPhase::Executing { level: 1 }).unwrap();
        state.transition(validating("b")).unwrap();
        state.transition(validating("c")).unwrap();
        state.transition(RunPhase::Integrating).unwrap();
        state.transition(RunPhase::Complete).unwrap();

        assert_eq!(state.phase(), &RunPhase::Complete);
        assert_eq!(state.history().len(), 8);
    }

    #[test]
    fn test_levels_cannot_be_skipped() {
        let mut state = RunState::new();
        state.transition(RunPhase::Executing { level: 0 }).unwrap();
        let err = state
            .transition(RunPhase::Executing { level: 2 })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        assert_eq!(state.phase(), &RunPhase::Executing { level: 0 });
    }

    #[test]
    fn test_resume_starts_mid_plan() {
        let mut state = RunState::new();
        state.transition(RunPhase::Executing { level: 2 }).unwrap();
        state.transition(validating("c")).unwrap();
        state.transition(RunPhase::Executing { level: 3 }).unwrap();
    }

    #[test]
    fn test_blocked_from_any_active_phase() {
        for phase in [
            RunPhase::Executing { level: 0 },
            validating("a"),
            RunPhase::Integrating,
        ] {
            let mut state = RunState::new();
            if phase != (RunPhase::Executing { level: 0 }) {
                state.transition(RunPhase::Executing { level: 0 }).unwrap();
            }
            if matches!(phase, RunPhase::Integrating) {
                state.transition(RunPhase::Integrating).unwrap();
            } else {
                state.transition(phase.clone()).unwrap();
            }
            assert!(state.can_transition(&RunPhase::Blocked));
            assert!(state.can_transition(&RunPhase::Cancelled));
        }
    }

    #[test]
    fn test_terminal_phases_are_final() {
        let mut state = RunState::new();
        state.transition(RunPhase::Blocked).unwrap();
        assert!(state.transition(RunPhase::Executing { level: 0 }).is_err());
        assert!(state.transition(RunPhase::Cancelled).is_err());
        assert!(state.transition(RunPhase::Complete).is_err());
    }

    #[test]
    fn test_complete_only_after_integration() {
        let mut state = RunState::new();
        state.transition(RunPhase::Executing { level: 0 }).unwrap();
        assert!(!state.can_transition(&RunPhase::Complete));
    }
}
