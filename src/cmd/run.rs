//! Task execution command.

use anyhow::{Context, Result};
use clap::Args;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use anvil::config::AnvilConfig;
use anvil::orchestrator::{Orchestrator, RunOutcome};
use anvil::store::FileStateStore;
use anvil::worker::{CommandWorker, resolve_command};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long)]
    pub spec: PathBuf,
    /// Resume this task instead of creating a new one
    #[arg(long)]
    pub task: Option<String>,
    #[arg(long, default_value = "")]
    pub description: String,
    /// Run every level sequentially in the project directory
    #[arg(long)]
    pub no_parallel: bool,
    /// Explore alternative implementations, e.g. `api=3,db=2`
    #[arg(long, value_delimiter = ',', value_parser = parse_variant)]
    pub variants: Vec<(String, usize)>,
    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_variant(s: &str) -> Result<(String, usize), String> {
    let (id, count) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <component>=<count>, got '{}'", s))?;
    let count = count
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid variant count '{}': {}", count, e))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("missing component id in '{}'", s));
    }
    Ok((id.to_string(), count))
}

pub async fn cmd_run(project_dir: &Path, args: RunArgs) -> Result<u8> {
    let spec_text = super::read_spec(project_dir, &args.spec)?;
    let config = AnvilConfig::new(project_dir)?.with_no_parallel(args.no_parallel);
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let store = FileStateStore::new(config.state_dir());
    let worker = CommandWorker::new(
        resolve_command(&config.project_dir, &config.worker_cmd()),
        config.toml.worker.args.clone(),
        config.worker_timeout(),
    );
    info!(worker = %worker.command(), "using worker command");

    let mut options = config.run_options();
    options.variants = args.variants.into_iter().collect::<BTreeMap<_, _>>();
    let orchestrator = Orchestrator::new(Arc::new(store), Arc::new(worker), options);

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight work");
            token.cancel();
        }
    });

    let outcome = match &args.task {
        Some(task_id) => orchestrator.resume(task_id, &spec_text).await,
        None => {
            let description = if args.description.is_empty() {
                args.spec.display().to_string()
            } else {
                args.description.clone()
            };
            orchestrator
                .start(&spec_text, &description, &config.project_dir)
                .await
        }
    }
    .context("Run aborted")?;

    print_outcome(&outcome, args.json)?;
    Ok(u8::try_from(outcome.exit_code()).unwrap_or(2))
}

fn print_outcome(outcome: &RunOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!("Task {}: {}", outcome.task_id, outcome.phase);
    if !outcome.completed.is_empty() {
        println!("Completed: {}", outcome.completed.join(", "));
    }
    if let Some(escalation) = &outcome.escalation {
        println!();
        print!("{}", escalation.render());
    }
    Ok(())
}
