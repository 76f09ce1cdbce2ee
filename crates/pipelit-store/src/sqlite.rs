use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use pipelit_config::{
  Epic, Execution, ExecutionLog, ExecutionStatus, ScheduledJob, ScheduledJobStatus, Workflow,
};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::Error;
use crate::Store;

/// SQLite-backed `Store` (runtime-built queries via `sqlx::query`/`query_as`,
/// not compile-time checked macros, so the workspace builds without a live
/// database at build time) covering the full entity set: workflows, nodes,
/// edges, executions, execution logs, scheduled jobs, epics, tasks, and
/// checkpoints.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }
}

fn opt_json(value: &Option<serde_json::Value>) -> Option<String> {
  value.as_ref().map(|v| v.to_string())
}

fn parse_opt_json(raw: Option<String>) -> Result<Option<serde_json::Value>, Error> {
  raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Error::from)
}

#[async_trait::async_trait]
impl Store for SqliteStore {
  #[tracing::instrument(skip(self, workflow))]
  async fn create_workflow(&self, workflow: &Workflow) -> Result<(), Error> {
    let data = serde_json::to_string(workflow)?;
    sqlx::query("INSERT INTO workflows (workflow_id, slug, data, deleted_at) VALUES (?, ?, ?, ?)")
      .bind(&workflow.workflow_id)
      .bind(&workflow.slug)
      .bind(&data)
      .bind(workflow.deleted_at)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, Error> {
    let row = sqlx::query("SELECT data FROM workflows WHERE workflow_id = ?")
      .bind(workflow_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))?;
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
  }

  async fn get_workflow_by_slug(&self, slug: &str) -> Result<Workflow, Error> {
    let row = sqlx::query("SELECT data FROM workflows WHERE slug = ?")
      .bind(slug)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("workflow slug {slug}")))?;
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
  }

  async fn delete_workflow(&self, workflow_id: &str, deleted_at: DateTime<Utc>) -> Result<(), Error> {
    sqlx::query("UPDATE workflows SET deleted_at = ? WHERE workflow_id = ?")
      .bind(deleted_at)
      .bind(workflow_id)
      .execute(&self.pool)
      .await?;
    self.kill_schedules_for_workflow(workflow_id).await
  }

  #[tracing::instrument(skip(self, execution))]
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO executions
        (execution_id, workflow_id, trigger_node_id, status, parent_execution_id, parent_node_id,
         thread_id, epic_id, task_id, trigger_payload, final_output, spent_tokens, spent_usd,
         started_at, completed_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.workflow_id)
    .bind(&execution.trigger_node_id)
    .bind(status_str(execution.status))
    .bind(&execution.parent_execution_id)
    .bind(&execution.parent_node_id)
    .bind(&execution.thread_id)
    .bind(&execution.epic_id)
    .bind(&execution.task_id)
    .bind(execution.trigger_payload.to_string())
    .bind(opt_json(&execution.final_output))
    .bind(execution.spent_tokens as i64)
    .bind(execution.spent_usd)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<Execution, Error> {
    let row = sqlx::query("SELECT * FROM executions WHERE execution_id = ?")
      .bind(execution_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))?;
    row_to_execution(&row)
  }

  async fn list_child_executions(&self, parent_execution_id: &str) -> Result<Vec<Execution>, Error> {
    let rows = sqlx::query("SELECT * FROM executions WHERE parent_execution_id = ?")
      .bind(parent_execution_id)
      .fetch_all(&self.pool)
      .await?;
    rows.iter().map(row_to_execution).collect()
  }

  #[tracing::instrument(skip(self))]
  async fn try_claim_execution(&self, execution_id: &str) -> Result<bool, Error> {
    let result = sqlx::query(
      "UPDATE executions SET status = 'running' WHERE execution_id = ? AND status = 'pending'",
    )
    .bind(execution_id)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn update_execution_status(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    final_output: Option<serde_json::Value>,
    completed_at: Option<DateTime<Utc>>,
  ) -> Result<(), Error> {
    sqlx::query(
      "UPDATE executions SET status = ?, final_output = ?, completed_at = ? WHERE execution_id = ?",
    )
    .bind(status_str(status))
    .bind(opt_json(&final_output))
    .bind(completed_at)
    .bind(execution_id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn add_execution_spend(&self, execution_id: &str, tokens: u64, usd: f64) -> Result<(), Error> {
    sqlx::query(
      "UPDATE executions SET spent_tokens = spent_tokens + ?, spent_usd = spent_usd + ? WHERE execution_id = ?",
    )
    .bind(tokens as i64)
    .bind(usd)
    .bind(execution_id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn append_log(&self, log: &ExecutionLog) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO execution_logs
        (execution_id, node_id, status, input, output, error, error_code, metadata, duration_ms, timestamp)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&log.execution_id)
    .bind(&log.node_id)
    .bind(&log.status)
    .bind(log.input.to_string())
    .bind(opt_json(&log.output))
    .bind(&log.error)
    .bind(log.error_code.map(|c| serde_json::to_string(&c).unwrap_or_default()))
    .bind(log.metadata.to_string())
    .bind(log.duration_ms as i64)
    .bind(log.timestamp)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn list_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLog>, Error> {
    let rows = sqlx::query("SELECT * FROM execution_logs WHERE execution_id = ? ORDER BY timestamp ASC")
      .bind(execution_id)
      .fetch_all(&self.pool)
      .await?;
    rows
      .iter()
      .map(|row| -> Result<ExecutionLog, Error> {
        let input: String = row.try_get("input")?;
        let output: Option<String> = row.try_get("output")?;
        let error_code: Option<String> = row.try_get("error_code")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(ExecutionLog {
          execution_id: row.try_get("execution_id")?,
          node_id: row.try_get("node_id")?,
          status: row.try_get("status")?,
          input: serde_json::from_str(&input)?,
          output: parse_opt_json(output)?,
          error: row.try_get("error")?,
          error_code: error_code.map(|c| serde_json::from_str(&c)).transpose()?,
          metadata: serde_json::from_str(&metadata)?,
          duration_ms: row.try_get::<i64, _>("duration_ms")? as u64,
          timestamp: row.try_get("timestamp")?,
        })
      })
      .collect()
  }

  async fn create_schedule(&self, job: &ScheduledJob) -> Result<(), Error> {
    self.save_schedule(job).await
  }

  async fn get_schedule(&self, job_id: &str) -> Result<ScheduledJob, Error> {
    let row = sqlx::query("SELECT * FROM scheduled_jobs WHERE job_id = ?")
      .bind(job_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("scheduled job {job_id}")))?;
    row_to_schedule(&row)
  }

  async fn list_active_schedules(&self) -> Result<Vec<ScheduledJob>, Error> {
    let rows = sqlx::query("SELECT * FROM scheduled_jobs WHERE status = 'active'")
      .fetch_all(&self.pool)
      .await?;
    rows.iter().map(row_to_schedule).collect()
  }

  async fn save_schedule(&self, job: &ScheduledJob) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO scheduled_jobs
        (job_id, workflow_id, trigger_node_id, interval_seconds, total_repeats, max_retries,
         timeout_seconds, trigger_payload, status, current_repeat, current_retry, last_run_at,
         next_run_at, run_count, error_count, last_error)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (job_id) DO UPDATE SET
        status = excluded.status,
        current_repeat = excluded.current_repeat,
        current_retry = excluded.current_retry,
        last_run_at = excluded.last_run_at,
        next_run_at = excluded.next_run_at,
        run_count = excluded.run_count,
        error_count = excluded.error_count,
        last_error = excluded.last_error
      "#,
    )
    .bind(&job.job_id)
    .bind(&job.workflow_id)
    .bind(&job.trigger_node_id)
    .bind(job.interval_seconds as i64)
    .bind(job.total_repeats as i64)
    .bind(job.max_retries as i64)
    .bind(job.timeout_seconds as i64)
    .bind(opt_json(&job.trigger_payload))
    .bind(schedule_status_str(job.status))
    .bind(job.current_repeat as i64)
    .bind(job.current_retry as i64)
    .bind(job.last_run_at)
    .bind(job.next_run_at)
    .bind(job.run_count as i64)
    .bind(job.error_count as i64)
    .bind(&job.last_error)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn set_schedule_status(&self, job_id: &str, status: ScheduledJobStatus) -> Result<(), Error> {
    sqlx::query("UPDATE scheduled_jobs SET status = ? WHERE job_id = ?")
      .bind(schedule_status_str(status))
      .bind(job_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn kill_schedules_for_workflow(&self, workflow_id: &str) -> Result<(), Error> {
    sqlx::query("UPDATE scheduled_jobs SET status = 'dead' WHERE workflow_id = ? AND status != 'dead'")
      .bind(workflow_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn get_epic(&self, epic_id: &str) -> Result<Epic, Error> {
    let row = sqlx::query("SELECT * FROM epics WHERE epic_id = ?")
      .bind(epic_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("epic {epic_id}")))?;
    Ok(Epic {
      epic_id: row.try_get("epic_id")?,
      title: row.try_get("title")?,
      budget_tokens: row.try_get::<Option<i64>, _>("budget_tokens")?.map(|v| v as u64),
      budget_usd: row.try_get("budget_usd")?,
      spent_tokens: row.try_get::<i64, _>("spent_tokens")? as u64,
      spent_usd: row.try_get("spent_usd")?,
      total_tasks: row.try_get::<i64, _>("total_tasks")? as u64,
      completed_tasks: row.try_get::<i64, _>("completed_tasks")? as u64,
      failed_tasks: row.try_get::<i64, _>("failed_tasks")? as u64,
    })
  }

  async fn add_epic_spend(&self, epic_id: &str, tokens: u64, usd: f64) -> Result<(), Error> {
    sqlx::query("UPDATE epics SET spent_tokens = spent_tokens + ?, spent_usd = spent_usd + ? WHERE epic_id = ?")
      .bind(tokens as i64)
      .bind(usd)
      .bind(epic_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteStore {
  async fn put(&self, key: &str, blob: serde_json::Value, expires_at: DateTime<Utc>) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO checkpoints (key, blob, expires_at) VALUES (?, ?, ?)
      ON CONFLICT (key) DO UPDATE SET blob = excluded.blob, expires_at = excluded.expires_at
      "#,
    )
    .bind(key)
    .bind(blob.to_string())
    .bind(expires_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Checkpoint>, Error> {
    let row = sqlx::query("SELECT blob, expires_at FROM checkpoints WHERE key = ?")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;
    let Some(row) = row else { return Ok(None) };
    let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
    if expires_at < Utc::now() {
      return Ok(None);
    }
    let blob: String = row.try_get("blob")?;
    Ok(Some(Checkpoint {
      key: key.to_string(),
      blob: serde_json::from_str(&blob)?,
      expires_at,
    }))
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    sqlx::query("DELETE FROM checkpoints WHERE key = ?")
      .bind(key)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, Error> {
  let status: String = row.try_get("status")?;
  let trigger_payload: String = row.try_get("trigger_payload")?;
  let final_output: Option<String> = row.try_get("final_output")?;
  Ok(Execution {
    execution_id: row.try_get("execution_id")?,
    workflow_id: row.try_get("workflow_id")?,
    trigger_node_id: row.try_get("trigger_node_id")?,
    status: parse_status(&status),
    parent_execution_id: row.try_get("parent_execution_id")?,
    parent_node_id: row.try_get("parent_node_id")?,
    thread_id: row.try_get("thread_id")?,
    epic_id: row.try_get("epic_id")?,
    task_id: row.try_get("task_id")?,
    trigger_payload: serde_json::from_str(&trigger_payload)?,
    final_output: parse_opt_json(final_output)?,
    spent_tokens: row.try_get::<i64, _>("spent_tokens")? as u64,
    spent_usd: row.try_get("spent_usd")?,
    started_at: row.try_get("started_at")?,
    completed_at: row.try_get("completed_at")?,
  })
}

fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> Result<ScheduledJob, Error> {
  let status: String = row.try_get("status")?;
  let trigger_payload: Option<String> = row.try_get("trigger_payload")?;
  Ok(ScheduledJob {
    job_id: row.try_get("job_id")?,
    workflow_id: row.try_get("workflow_id")?,
    trigger_node_id: row.try_get("trigger_node_id")?,
    interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
    total_repeats: row.try_get::<i64, _>("total_repeats")? as u64,
    max_retries: row.try_get::<i64, _>("max_retries")? as u32,
    timeout_seconds: row.try_get::<i64, _>("timeout_seconds")? as u64,
    trigger_payload: parse_opt_json(trigger_payload)?,
    status: parse_schedule_status(&status),
    current_repeat: row.try_get::<i64, _>("current_repeat")? as u64,
    current_retry: row.try_get::<i64, _>("current_retry")? as u32,
    last_run_at: row.try_get("last_run_at")?,
    next_run_at: row.try_get("next_run_at")?,
    run_count: row.try_get::<i64, _>("run_count")? as u64,
    error_count: row.try_get::<i64, _>("error_count")? as u64,
    last_error: row.try_get("last_error")?,
  })
}

fn status_str(status: ExecutionStatus) -> &'static str {
  match status {
    ExecutionStatus::Pending => "pending",
    ExecutionStatus::Running => "running",
    ExecutionStatus::Interrupted => "interrupted",
    ExecutionStatus::Completed => "completed",
    ExecutionStatus::Failed => "failed",
    ExecutionStatus::Cancelled => "cancelled",
  }
}

fn parse_status(raw: &str) -> ExecutionStatus {
  match raw {
    "pending" => ExecutionStatus::Pending,
    "running" => ExecutionStatus::Running,
    "interrupted" => ExecutionStatus::Interrupted,
    "completed" => ExecutionStatus::Completed,
    "failed" => ExecutionStatus::Failed,
    "cancelled" => ExecutionStatus::Cancelled,
    other => panic!("unknown execution status in storage: {other}"),
  }
}

fn schedule_status_str(status: ScheduledJobStatus) -> &'static str {
  match status {
    ScheduledJobStatus::Active => "active",
    ScheduledJobStatus::Paused => "paused",
    ScheduledJobStatus::Done => "done",
    ScheduledJobStatus::Dead => "dead",
  }
}

fn parse_schedule_status(raw: &str) -> ScheduledJobStatus {
  match raw {
    "active" => ScheduledJobStatus::Active,
    "paused" => ScheduledJobStatus::Paused,
    "done" => ScheduledJobStatus::Done,
    "dead" => ScheduledJobStatus::Dead,
    other => panic!("unknown scheduled job status in storage: {other}"),
  }
}
