mod components;

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::EnvFilter;

use pipelit_broadcast::{execution_channel, Bus};
use pipelit_builder::Plan;
use pipelit_config::ExecutionStatus;
use pipelit_graph_cache::GraphCache;
use pipelit_orchestrator::{context, Deps};
use pipelit_queue::{InMemoryDispatcher, JobDispatcher};
use pipelit_store::{Error as StoreError, SqliteStore};

/// Jobs re-enqueued when a sub-workflow completes and its parent node is
/// ready to resume. Not a public constant of `pipelit-orchestrator` — it's
/// an implementation detail of `subworkflow::notify_parent_if_waiting` —
/// so the worker pool that drains it is wired up here instead.
const RESUME_QUEUE: &str = "resume";

#[derive(Parser)]
#[command(name = "pipelit")]
#[command(version, about = "Self-hosted execution engine for directed graphs of LLM-driven workflow nodes", long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.pipelit)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Start the worker pool and block until interrupted: drains the
  /// workflow queue, the sub-workflow resume queue, and the scheduler's
  /// dispatch queue, recovering any schedules left active from a prior
  /// run first.
  Serve {
    /// Number of concurrent workers draining the workflow queue.
    #[arg(long, default_value_t = 4)]
    workers: usize,
  },

  /// Load a workflow definition (JSON, matching the `Workflow` entity
  /// shape) into the store if it isn't there yet, trigger one execution
  /// of it, and print the final output once it completes.
  Run {
    /// Path to the workflow definition file.
    workflow_file: PathBuf,

    /// Override the trigger node id instead of using the workflow's
    /// default trigger node.
    #[arg(long)]
    trigger_node: Option<String>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

  let cli = Cli::parse();
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
  let data_dir = cli
    .data_dir
    .unwrap_or_else(|| dirs::home_dir().expect("could not determine home directory").join(".pipelit"));
  tokio::fs::create_dir_all(&data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let deps = build_deps(&data_dir).await?;

  match cli.command {
    Commands::Serve { workers } => serve(deps, workers).await,
    Commands::Run { workflow_file, trigger_node } => run_once(deps, workflow_file, trigger_node).await,
  }
}

async fn build_deps(data_dir: &PathBuf) -> Result<Deps> {
  let db_path = data_dir.join("pipelit.db");
  let url = format!("sqlite://{}?mode=rwc", db_path.display());
  let pool = SqlitePoolOptions::new()
    .connect(&url)
    .await
    .with_context(|| format!("failed to open database at {}", db_path.display()))?;

  let store = Arc::new(SqliteStore::new(pool));
  store.migrate().await.context("failed to run database migrations")?;

  let dispatcher: Arc<dyn JobDispatcher> = Arc::new(InMemoryDispatcher::new());
  let bus = Arc::new(Bus::new());
  let plans = Arc::new(GraphCache::<Plan>::new());
  let registry = components::demo_registry();

  Ok(Deps::new(store.clone(), store, registry, plans, dispatcher, bus))
}

/// Run the worker pool in-process: `workers` tasks draining the workflow
/// queue, one draining the resume queue, and one driving the scheduler's
/// self-rescheduling dispatch loop, with crash recovery run once up front.
async fn serve(deps: Deps, workers: usize) -> Result<()> {
  pipelit_scheduler::recover(&deps).await.context("failed to recover active schedules")?;

  for worker in 0..workers.max(1) {
    let worker_deps = deps.clone();
    tokio::spawn(async move {
      loop {
        let job = worker_deps.dispatcher.dequeue(context::WORKFLOW_QUEUE).await;
        let execution_id = match job.payload["execution_id"].as_str() {
          Some(id) => id.to_string(),
          None => {
            tracing::warn!(worker, job_id = %job.job_id, "workflow job missing execution_id");
            continue;
          }
        };
        let run_deps = worker_deps.clone();
        tokio::spawn(async move {
          if let Err(err) = pipelit_orchestrator::run(&run_deps, &execution_id).await {
            tracing::error!(%execution_id, %err, "execution failed");
          }
        });
      }
    });
  }

  {
    let deps = deps.clone();
    tokio::spawn(async move {
      loop {
        let job = deps.dispatcher.dequeue(RESUME_QUEUE).await;
        let parent_execution_id = job.payload["parent_execution_id"].as_str().map(str::to_string);
        let parent_node_id = job.payload["parent_node_id"].as_str().map(str::to_string);
        let child_result = job.payload["child_result"].clone();
        let (Some(parent_execution_id), Some(parent_node_id)) = (parent_execution_id, parent_node_id) else {
          tracing::warn!(job_id = %job.job_id, "resume job missing parent identifiers");
          continue;
        };
        let deps = deps.clone();
        tokio::spawn(async move {
          if let Err(err) = pipelit_orchestrator::resume(&deps, &parent_execution_id, &parent_node_id, child_result).await {
            tracing::error!(%parent_execution_id, %parent_node_id, %err, "resume failed");
          }
        });
      }
    });
  }

  {
    let deps = deps.clone();
    tokio::spawn(async move {
      loop {
        let job = deps.dispatcher.dequeue(pipelit_scheduler::SCHEDULER_QUEUE).await;
        let job_id = match job.payload["job_id"].as_str() {
          Some(id) => id.to_string(),
          None => {
            tracing::warn!(job_id = %job.job_id, "scheduler dispatch missing job_id");
            continue;
          }
        };
        let deps = deps.clone();
        tokio::spawn(async move {
          if let Err(err) = pipelit_scheduler::run_dispatch(&deps, &job_id).await {
            tracing::error!(%job_id, %err, "scheduled dispatch failed");
          }
        });
      }
    });
  }

  tracing::info!(workers, "pipelit serving");
  tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
  tracing::info!("shutting down");
  Ok(())
}

/// One-shot `run`: load (or reuse) the workflow, fire a single execution,
/// and wait for it to reach a terminal status the same way the scheduler
/// waits on a fired dispatch job — subscribing before enqueuing so a fast
/// worker can't complete and publish before anyone is listening.
async fn run_once(deps: Deps, workflow_file: PathBuf, trigger_node: Option<String>) -> Result<()> {
  let definition = tokio::fs::read_to_string(&workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let workflow: pipelit_config::Workflow = serde_json::from_str(&definition)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let workflow = match deps.store.get_workflow_by_slug(&workflow.slug).await {
    Ok(existing) => existing,
    Err(StoreError::NotFound(_)) => {
      deps.store.create_workflow(&workflow).await.context("failed to store workflow")?;
      workflow
    }
    Err(err) => return Err(err).context("failed to look up workflow"),
  };

  let payload = read_payload_from_stdin()?;
  let trigger_node_id = match trigger_node {
    Some(id) => id,
    None => context::default_trigger_node(&workflow).context("workflow has no trigger node")?,
  };

  let execution_id = uuid::Uuid::new_v4().to_string();
  let execution = pipelit_config::Execution::new(execution_id.as_str(), workflow.workflow_id.as_str(), trigger_node_id.as_str(), payload, chrono::Utc::now());
  deps.store.create_execution(&execution).await.context("failed to create execution")?;

  let mut events = deps.bus.subscribe(&execution_channel(&execution_id));
  deps
    .dispatcher
    .enqueue(context::WORKFLOW_QUEUE, &execution_id, serde_json::json!({"execution_id": execution_id}))
    .await;

  // No persistent worker pool is running for a one-shot invocation, so
  // drive this execution (and any sub-workflow it delegates to) directly
  // off the same queues `serve` would drain.
  let status = loop {
    tokio::select! {
      event = events.recv() => {
        let Some(event) = event else { break deps.store.get_execution(&execution_id).await?.status };
        // `finish`/`cancel_execution` only emit these for a terminal outcome;
        // an interrupted (sub-workflow-pending) execution publishes
        // `execution_interrupted` instead, so this never fires early.
        let is_terminal_event = matches!(
          event.event_type.as_str(),
          "execution_completed" | "execution_failed" | "execution_cancelled"
        );
        if is_terminal_event && event.data["execution_id"] == execution_id {
          if let Some(status) = event.data.get("status").and_then(|v| serde_json::from_value::<ExecutionStatus>(v.clone()).ok()) {
            break status;
          }
        }
      }
      job = deps.dispatcher.dequeue(context::WORKFLOW_QUEUE) => {
        let child_id = job.payload["execution_id"].as_str().unwrap_or_default().to_string();
        let deps = deps.clone();
        tokio::spawn(async move {
          let _ = pipelit_orchestrator::run(&deps, &child_id).await;
        });
      }
      job = deps.dispatcher.dequeue(RESUME_QUEUE) => {
        let parent_execution_id = job.payload["parent_execution_id"].as_str().unwrap_or_default().to_string();
        let parent_node_id = job.payload["parent_node_id"].as_str().unwrap_or_default().to_string();
        let child_result = job.payload["child_result"].clone();
        let deps = deps.clone();
        tokio::spawn(async move {
          let _ = pipelit_orchestrator::resume(&deps, &parent_execution_id, &parent_node_id, child_result).await;
        });
      }
    }
  };

  tracing::info!(%execution_id, ?status, "execution finished");
  let execution = deps.store.get_execution(&execution_id).await?;
  println!("{}", serde_json::to_string_pretty(&execution.final_output.unwrap_or(serde_json::json!({})))?);
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).context("failed to read payload from stdin")?;
    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
