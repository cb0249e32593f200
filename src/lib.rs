pub mod component;
pub mod config;
pub mod dag;
pub mod errors;
pub mod issues;
pub mod logging;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod tracker;
pub mod util;
pub mod worker;
pub mod worktree;
