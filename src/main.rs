use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use anvil::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "anvil")]
#[command(version, about = "Dependency-ordered component orchestration with quality gates")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the execution levels of a spec
    Plan {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Create or resume a task and run it
    Run(cmd::run::RunArgs),
    /// Show the state of a task
    Status {
        #[arg(long)]
        task: String,
        #[arg(long)]
        json: bool,
    },
    /// List the checkpoints of a task
    Checkpoints {
        #[arg(long)]
        task: String,
    },
    /// Roll a task back to a checkpoint, restoring its snapshot
    Rollback {
        #[arg(long)]
        task: String,
        #[arg(long)]
        checkpoint: String,
    },
    /// List known tasks
    Tasks,
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Plan { spec, json } => cmd::cmd_plan(&project_dir, &spec, json)?,
        Commands::Run(args) => return cmd::cmd_run(&project_dir, args).await,
        Commands::Status { task, json } => cmd::cmd_status(&project_dir, &task, json)?,
        Commands::Checkpoints { task } => cmd::cmd_checkpoints(&project_dir, &task)?,
        Commands::Rollback { task, checkpoint } => {
            cmd::cmd_rollback(&project_dir, &task, &checkpoint)?
        }
        Commands::Tasks => cmd::cmd_tasks(&project_dir)?,
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
