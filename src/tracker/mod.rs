//! Filesystem snapshots backing checkpoints.

mod git;

pub use git::GitTracker;
