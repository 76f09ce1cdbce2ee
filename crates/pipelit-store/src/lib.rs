//! Persistent storage (ambient stack).
//!
//! Splits wire types (here: the entity structs in `pipelit-config`) from
//! a storage trait consumed by everything above it. The concrete storage
//! engine is out of scope for the core, but this crate still needs one
//! working implementation to drive the orchestrator and scheduler end to
//! end, so it supplies `SqliteStore` as the one concrete `Store` impl.

mod checkpoint;
mod error;
mod sqlite;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::Error;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pipelit_config::{Epic, Execution, ExecutionLog, ExecutionStatus, ScheduledJob, ScheduledJobStatus, Workflow};

/// The storage boundary every other crate above this one depends on.
/// `try_claim_execution` is the status-CAS primitive: at most one worker may move an execution out of `pending` at a
/// time, and a second claim attempt — whether from a genuinely concurrent
/// worker or a mistaken re-enqueue of an already-terminal execution — must
/// fail rather than silently re-running the graph.
#[async_trait]
pub trait Store: Send + Sync {
  async fn create_workflow(&self, workflow: &Workflow) -> Result<(), Error>;
  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, Error>;
  async fn get_workflow_by_slug(&self, slug: &str) -> Result<Workflow, Error>;
  async fn delete_workflow(&self, workflow_id: &str, deleted_at: DateTime<Utc>) -> Result<(), Error>;

  async fn create_execution(&self, execution: &Execution) -> Result<(), Error>;
  async fn get_execution(&self, execution_id: &str) -> Result<Execution, Error>;
  async fn list_child_executions(&self, parent_execution_id: &str) -> Result<Vec<Execution>, Error>;

  /// Atomically move `execution_id` from `pending` into `running`.
  /// Returns `false` (not an error) if it was already claimed or is
  /// already terminal.
  async fn try_claim_execution(&self, execution_id: &str) -> Result<bool, Error>;

  async fn update_execution_status(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    final_output: Option<serde_json::Value>,
    completed_at: Option<DateTime<Utc>>,
  ) -> Result<(), Error>;

  /// Accumulate `_token_usage` into the execution's running counters.
  async fn add_execution_spend(&self, execution_id: &str, tokens: u64, usd: f64) -> Result<(), Error>;

  async fn append_log(&self, log: &ExecutionLog) -> Result<(), Error>;
  async fn list_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLog>, Error>;

  async fn create_schedule(&self, job: &ScheduledJob) -> Result<(), Error>;
  async fn get_schedule(&self, job_id: &str) -> Result<ScheduledJob, Error>;
  async fn list_active_schedules(&self) -> Result<Vec<ScheduledJob>, Error>;
  /// Persist a full state transition (status, repeat/retry counters,
  /// timestamps, run/error counts) in one write, as the scheduler does at
  /// the end of every dispatcher job.
  async fn save_schedule(&self, job: &ScheduledJob) -> Result<(), Error>;
  async fn set_schedule_status(&self, job_id: &str, status: ScheduledJobStatus) -> Result<(), Error>;
  /// Mark every schedule targeting `workflow_id` dead (weak reference:
  /// deleting the workflow doesn't delete the job row, just ends it).
  async fn kill_schedules_for_workflow(&self, workflow_id: &str) -> Result<(), Error>;

  async fn get_epic(&self, epic_id: &str) -> Result<Epic, Error>;
  /// Roll up actual spend into the epic under a per-epic lock; the single `UPDATE ... SET x = x + ?` is itself the
  /// lock under SQLite's single-writer-at-a-time semantics.
  async fn add_epic_spend(&self, epic_id: &str, tokens: u64, usd: f64) -> Result<(), Error>;
}
