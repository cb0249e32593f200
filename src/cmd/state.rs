//! Task inspection and rollback commands.

use anyhow::{Context, Result};
use std::path::Path;

use anvil::store::{FileStateStore, StateStore, TaskState};
use anvil::tracker::GitTracker;
use anvil::util::{short_id, state_dir};

fn open_store(project_dir: &Path) -> FileStateStore {
    FileStateStore::new(state_dir(project_dir))
}

fn status_label(state: &TaskState) -> &'static str {
    if state.finished_at.is_some() {
        "complete"
    } else if state.is_blocked() {
        "blocked"
    } else {
        "in progress"
    }
}

pub fn cmd_status(project_dir: &Path, task_id: &str, json: bool) -> Result<()> {
    let state = open_store(project_dir).get_state(task_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!();
    println!("Task:        {}", state.task_id);
    if !state.description.is_empty() {
        println!("Description: {}", state.description);
    }
    println!("Directory:   {}", state.working_dir.display());
    println!("Created:     {}", state.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Status:      {}", status_label(&state));
    if let Some(position) = &state.position {
        println!(
            "Position:    {} (level {})",
            position.component_id, position.level
        );
    }
    println!();

    if state.results.is_empty() {
        println!("No components have run yet.");
    } else {
        println!(
            "{:<20} {:<8} {:<10} {:<10} {:<8} Issues",
            "Component", "Status", "Validation", "Tests", "Coverage"
        );
        for (id, result) in &state.results {
            let status = if state.is_completed(id) { "done" } else { "failed" };
            let coverage = result
                .coverage
                .map(|c| format!("{:.1}%", c))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<20} {:<8} {:<10} {:<10} {:<8} {}",
                id,
                status,
                result.validation_attempts,
                result.test_attempts,
                coverage,
                result.issues.total()
            );
        }
    }

    if let Some(escalation) = &state.escalation {
        println!();
        print!("{}", escalation.render());
    }
    println!();
    Ok(())
}

pub fn cmd_checkpoints(project_dir: &Path, task_id: &str) -> Result<()> {
    let state = open_store(project_dir).get_state(task_id)?;
    if state.checkpoints.is_empty() {
        println!("No checkpoints for task {}.", task_id);
        return Ok(());
    }

    println!("{:<10} {:<10} {:<10} {:<22} Label", "Id", "Completed", "Snapshot", "Created");
    for checkpoint in &state.checkpoints {
        println!(
            "{:<10} {:<10} {:<10} {:<22} {}",
            checkpoint.id,
            checkpoint.completed_len,
            checkpoint.snapshot.as_deref().map(short_id).unwrap_or("-"),
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.label
        );
    }
    Ok(())
}

pub fn cmd_rollback(project_dir: &Path, task_id: &str, checkpoint_id: &str) -> Result<()> {
    let store = open_store(project_dir);
    store.rollback(task_id, checkpoint_id)?;
    let state = store.get_state(task_id)?;

    let snapshot = state
        .checkpoint(checkpoint_id)
        .and_then(|c| c.snapshot.clone());
    match (snapshot, GitTracker::discover(&state.working_dir)) {
        (Some(sha), Some(git)) => {
            git.restore(&sha)
                .with_context(|| format!("Failed to restore snapshot {}", short_id(&sha)))?;
            println!("Restored working tree to {}", short_id(&sha));
        }
        (Some(_), None) => println!(
            "Checkpoint has a snapshot but {} is not a git repository; files left as they are",
            state.working_dir.display()
        ),
        (None, _) => {}
    }

    println!(
        "Task {} rolled back to {} ({} component(s) completed)",
        task_id,
        checkpoint_id,
        state.completed.len()
    );
    Ok(())
}

pub fn cmd_tasks(project_dir: &Path) -> Result<()> {
    let store = open_store(project_dir);
    let tasks = store.list_tasks()?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<10} Description", "Task", "Status", "Completed");
    for task_id in tasks {
        let state = store.get_state(&task_id)?;
        println!(
            "{:<38} {:<12} {:<10} {}",
            task_id,
            status_label(&state),
            state.completed.len(),
            state.description
        );
    }
    Ok(())
}
