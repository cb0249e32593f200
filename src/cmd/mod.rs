//! CLI command implementations.
//!
//! | Module  | Commands handled                                  |
//! |---------|---------------------------------------------------|
//! | `plan`  | `Plan`                                            |
//! | `run`   | `Run`                                             |
//! | `state` | `Status`, `Checkpoints`, `Rollback`, `Tasks`      |

pub mod plan;
pub mod run;
pub mod state;

pub use plan::cmd_plan;
pub use run::cmd_run;
pub use state::{cmd_checkpoints, cmd_rollback, cmd_status, cmd_tasks};

use anyhow::{Context, Result};
use std::path::Path;

/// Read a spec file, relative paths resolved against the project.
pub(crate) fn read_spec(project_dir: &Path, spec: &Path) -> Result<String> {
    let path = if spec.is_relative() && !spec.exists() {
        project_dir.join(spec)
    } else {
        spec.to_path_buf()
    };
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read spec file: {}", path.display()))
}
