//! stepflow CLI - drive processes stored in a JSON state file.

mod definition;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use stepflow_core::{Actor, BatchId, Process, ProcessId, TaskId};
use stepflow_engine::{
    collect_metrics, BatchReport, Collaborators, Engine, EngineConfig, MemberResult, MemoryStore,
    StoreSnapshot,
};

use crate::definition::ProcessDefinition;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// stepflow CLI - digitization workflow task progression
#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Move processes through their tasks", long_about = None)]
struct Cli {
    /// State file holding all processes, history and properties
    #[arg(short, long, default_value = "stepflow-state.json")]
    state: PathBuf,

    /// Acting user
    #[arg(short, long, default_value = "admin")]
    actor: String,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the script timeout in seconds
    #[arg(long)]
    script_timeout: Option<u64>,

    /// Disable metadata validation on close
    #[arg(long)]
    no_metadata_validation: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a process from a definition file
    Init {
        /// Process definition (JSON)
        definition: PathBuf,
    },

    /// Show a process and its tasks
    Show {
        /// Process ID
        id: String,
    },

    /// Take over an open task
    #[command(name = "take-over")]
    TakeOver {
        /// Task ID
        id: String,
    },

    /// Close a task and advance its process
    Close {
        /// Task ID
        id: String,
    },

    /// Hand a task in work back
    #[command(name = "give-back")]
    GiveBack {
        /// Task ID
        id: String,
    },

    /// Report a problem and send the process back to an earlier task
    #[command(name = "report-problem")]
    ReportProblem {
        /// Reporting task ID
        id: String,

        /// Title of the earlier task to correct
        #[arg(short, long)]
        target: String,

        /// Problem description
        #[arg(short, long)]
        message: String,
    },

    /// Solve a problem and resume at a later task
    #[command(name = "solve-problem")]
    SolveProblem {
        /// Task ID the correction was done in
        id: String,

        /// Title of the later task to resume at
        #[arg(short, long)]
        target: String,

        /// Solution description
        #[arg(short, long)]
        message: String,
    },

    /// Take over a task in every process of a batch
    #[command(name = "batch-take-over")]
    BatchTakeOver {
        #[arg(short, long)]
        batch: String,

        /// Task title
        #[arg(short, long)]
        title: String,
    },

    /// Close a task in every process of a batch
    #[command(name = "batch-close")]
    BatchClose {
        #[arg(short, long)]
        batch: String,

        /// Task title
        #[arg(short, long)]
        title: String,
    },

    /// Move a task one status forward (administrative)
    #[command(name = "status-up")]
    StatusUp {
        /// Task ID
        id: String,
    },

    /// Move a task one status back (administrative)
    #[command(name = "status-down")]
    StatusDown {
        /// Task ID
        id: String,
    },

    /// Print Prometheus metrics for all processes
    Metrics,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Arc::new(MemoryStore::from_snapshot(load_state(&cli.state)?));
    let engine = Engine::new(
        config.clone(),
        Collaborators::in_memory_with_shell(store.clone(), &config),
    )?;
    let actor = Actor::new(cli.actor.clone());

    match cli.command {
        Commands::Init { definition } => {
            let process = read_definition(&definition)?;
            let process = engine.start_process(process).await?;
            println!("Process created: {}", process.id);
        }
        Commands::Show { id } => {
            let process = engine.load_process(&ProcessId::new(id)).await?;
            print_process(&process);
        }
        Commands::TakeOver { id } => {
            let task = engine.take_over(&TaskId::new(id), &actor).await?;
            print_json(&task)?;
        }
        Commands::Close { id } => {
            let report = engine.close(&TaskId::new(id), &actor).await?;
            print_json(&report)?;
        }
        Commands::GiveBack { id } => {
            let task = engine.give_back(&TaskId::new(id), &actor).await?;
            print_json(&task)?;
        }
        Commands::ReportProblem {
            id,
            target,
            message,
        } => {
            let report = engine
                .report_problem(&TaskId::new(id), &target, &message, &actor)
                .await?;
            print_json(&report)?;
        }
        Commands::SolveProblem {
            id,
            target,
            message,
        } => {
            let solution = engine
                .solve_problem(&TaskId::new(id), &target, &message, &actor)
                .await?;
            print_json(&solution)?;
        }
        Commands::BatchTakeOver { batch, title } => {
            let group = engine.batch_group(&BatchId::new(batch), &title).await?;
            print_batch(&engine.take_over_batch(&group, &actor).await?);
        }
        Commands::BatchClose { batch, title } => {
            let group = engine.batch_group(&BatchId::new(batch), &title).await?;
            print_batch(&engine.close_batch(&group, &actor).await?);
        }
        Commands::StatusUp { id } => {
            let task = engine.set_status_up(&TaskId::new(id), &actor).await?;
            print_json(&task)?;
        }
        Commands::StatusDown { id } => {
            let task = engine.set_status_down(&TaskId::new(id), &actor).await?;
            print_json(&task)?;
        }
        Commands::Metrics => {
            print!("{}", collect_metrics(store.as_ref()).await?);
        }
    }

    // Let automatic tasks opened by this command run to completion
    engine.wait_idle().await;
    save_state(&cli.state, &store.snapshot().await)?;
    Ok(())
}

fn load_config(cli: &Cli) -> CliResult<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    if let Some(secs) = cli.script_timeout {
        config.script.timeout_secs = secs;
    }
    if cli.no_metadata_validation {
        config.metadata_validation = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_state(path: &Path) -> CliResult<StoreSnapshot> {
    if !path.exists() {
        info!(path = %path.display(), "No state file yet, starting empty");
        return Ok(StoreSnapshot::default());
    }
    let snapshot = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    debug!(path = %path.display(), "State loaded");
    Ok(snapshot)
}

fn save_state(path: &Path, snapshot: &StoreSnapshot) -> CliResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(snapshot)?)?;
    debug!(path = %path.display(), "State saved");
    Ok(())
}

fn read_definition(path: &Path) -> CliResult<Process> {
    let definition: ProcessDefinition = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(definition.into_process()?)
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_process(process: &Process) {
    println!("Process:  {} ({})", process.title, process.id);
    if let Some(batch) = &process.batch_id {
        println!("Batch:    {batch}");
    }
    let p = process.progress;
    println!(
        "Progress: {}% done, {}% in work, {}% open, {}% locked",
        p.done, p.in_work, p.open, p.locked
    );
    if let Some(images) = process.image_count {
        println!("Images:   {images}");
    }
    println!();
    println!("{:<5}  {:<8}  {:<24}  {:<36}  {}", "ORD", "STATUS", "TITLE", "ID", "FLAGS");
    println!("{}", "-".repeat(90));

    for task in process.tasks() {
        let mut flags = Vec::new();
        if task.is_automatic {
            flags.push("auto");
        }
        if task.is_finish_immediately {
            flags.push("finish");
        }
        if task.is_batch_eligible {
            flags.push("batch");
        }
        if task.is_correction_flagged {
            flags.push("correction");
        }
        println!(
            "{:<5}  {:<8}  {:<24}  {:<36}  {}",
            task.ordering,
            task.status.as_str(),
            task.title,
            task.id.as_str(),
            flags.join(",")
        );
    }
}

fn print_batch(report: &BatchReport) {
    for outcome in &report.outcomes {
        let result = match &outcome.result {
            MemberResult::Applied => "applied".to_string(),
            MemberResult::Skipped(reason) => format!("skipped: {reason}"),
            MemberResult::Failed(err) => format!("failed: {err}"),
        };
        println!(
            "{:<36}  {:<36}  {}",
            outcome.process_id.as_str(),
            outcome.task_id.as_str(),
            result
        );
    }
    println!(
        "{} applied, {} skipped, {} failed",
        report.applied(),
        report.skipped(),
        report.failed()
    );
}
