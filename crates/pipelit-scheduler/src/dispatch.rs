use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use pipelit_broadcast::Event;
use pipelit_config::{Execution, ExecutionStatus, ScheduledJob, ScheduledJobStatus};
use pipelit_orchestrator::Deps;

use crate::error::SchedulerError;
use crate::ids;

/// The dispatcher queue every scheduler firing is enqueued on, separate
/// from `pipelit_orchestrator::context::WORKFLOW_QUEUE` so the two worker
/// pools (plain executions vs. scheduled firings) can be sized
/// independently.
pub const SCHEDULER_QUEUE: &str = "scheduler";

/// One full dispatcher job: load the job, fire it if still active, record
/// the outcome, and reschedule. Called by a worker that
/// dequeued a job id off `SCHEDULER_QUEUE`.
pub async fn run_dispatch(deps: &Deps, job_id: &str) -> Result<(), SchedulerError> {
  let mut job = deps.store.get_schedule(job_id).await?;
  if job.status != ScheduledJobStatus::Active {
    // Paused or already terminal: a stale dispatcher entry from before the
    // pause/delete landed. Drop it silently rather than firing anyway.
    return Ok(());
  }

  job.last_run_at = Some(Utc::now());
  job.run_count += 1;

  match fire(deps, &job).await {
    Ok(ExecutionStatus::Completed) => succeed(deps, &mut job).await,
    Ok(other) => fail(deps, &mut job, format!("execution ended in status {other:?}")).await,
    Err(err) => fail(deps, &mut job, err.to_string()).await,
  }
}

/// Enqueue one execution of `job`'s workflow and wait (bounded by
/// `timeout_seconds`) for it to reach a terminal status, subscribing to
/// the execution's event channel *before* enqueuing so a worker that
/// finishes the execution immediately can never publish its
/// `execution_status` event before we're listening for it.
async fn fire(deps: &Deps, job: &ScheduledJob) -> Result<ExecutionStatus, SchedulerError> {
  let workflow = deps.store.get_workflow(&job.workflow_id).await?;
  let execution_id = uuid::Uuid::new_v4().to_string();
  let trigger_payload = job.trigger_payload.clone().unwrap_or_else(|| serde_json::json!({}));
  let execution = Execution::new(
    execution_id.as_str(),
    job.workflow_id.as_str(),
    job.trigger_node_id.as_str(),
    trigger_payload,
    Utc::now(),
  );
  deps.store.create_execution(&execution).await?;

  let mut events = deps.bus.subscribe(&pipelit_broadcast::execution_channel(&execution_id));

  deps
    .dispatcher
    .enqueue(
      pipelit_orchestrator::context::WORKFLOW_QUEUE,
      &execution_id,
      serde_json::json!({"execution_id": execution_id}),
    )
    .await;

  let timeout = Duration::from_secs(job.timeout_seconds.max(1));
  match tokio::time::timeout(timeout, wait_for_terminal(&mut events, &execution_id)).await {
    Ok(Some(status)) => Ok(status),
    Ok(None) => Ok(deps.store.get_execution(&execution_id).await?.status),
    Err(_) => {
      let _ = workflow; // kept for parity with a future per-workflow timeout override
      Err(SchedulerError::Timeout(execution_id))
    }
  }
}

/// Watch `events` for one of the terminal execution events carrying
/// `execution_id`'s final status. Returns `None` if the channel closes
/// first (bus shutdown), in which case the caller falls back to reading
/// the store directly.
async fn wait_for_terminal(events: &mut mpsc::Receiver<Event>, execution_id: &str) -> Option<ExecutionStatus> {
  while let Some(event) = events.recv().await {
    if !matches!(
      event.event_type.as_str(),
      "execution_completed" | "execution_failed" | "execution_cancelled"
    ) {
      continue;
    }
    if event.data.get("execution_id").and_then(|v| v.as_str()) != Some(execution_id) {
      continue;
    }
    if let Some(status) = event
      .data
      .get("status")
      .and_then(|v| serde_json::from_value::<ExecutionStatus>(v.clone()).ok())
    {
      return Some(status);
    }
  }
  None
}

async fn succeed(deps: &Deps, job: &mut ScheduledJob) -> Result<(), SchedulerError> {
  job.current_retry = 0;
  job.current_repeat += 1;

  let exhausted = job.total_repeats > 0 && job.current_repeat >= job.total_repeats;
  if exhausted {
    job.status = ScheduledJobStatus::Done;
    deps.store.save_schedule(job).await?;
    return Ok(());
  }

  job.next_run_at = Utc::now() + chrono::Duration::seconds(job.interval_seconds as i64);
  deps.store.save_schedule(job).await?;
  enqueue_next(deps, job).await
}

async fn fail(deps: &Deps, job: &mut ScheduledJob, message: String) -> Result<(), SchedulerError> {
  job.current_retry += 1;
  job.error_count += 1;
  job.last_error = Some(message);

  if job.current_retry >= job.max_retries {
    job.status = ScheduledJobStatus::Dead;
    deps.store.save_schedule(job).await?;
    return Ok(());
  }

  let delay = ids::backoff(job.interval_seconds, job.current_retry);
  job.next_run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
  deps.store.save_schedule(job).await?;
  enqueue_next(deps, job).await
}

/// Compute the delay until `job.next_run_at` and enqueue its next firing
/// under the deterministic id `dispatch_job_id`, which a concurrent
/// dispatcher (or crash recovery racing this same call) would compute
/// identically — the dedup that makes re-enqueueing safe.
pub(crate) async fn enqueue_next(deps: &Deps, job: &ScheduledJob) -> Result<(), SchedulerError> {
  let delay = (job.next_run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
  let id = ids::dispatch_job_id(&job.job_id, job.current_repeat, job.current_retry);
  deps
    .dispatcher
    .enqueue_in(SCHEDULER_QUEUE, &id, serde_json::json!({"job_id": job.job_id}), delay)
    .await;
  Ok(())
}
