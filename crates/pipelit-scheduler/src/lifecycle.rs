use chrono::Utc;

use pipelit_config::ScheduledJobStatus;
use pipelit_orchestrator::Deps;

use crate::dispatch::enqueue_next;
use crate::error::SchedulerError;

/// Persist a new schedule and enqueue its first firing.
pub async fn create_schedule(deps: &Deps, job: pipelit_config::ScheduledJob) -> Result<(), SchedulerError> {
  deps.store.create_schedule(&job).await?;
  enqueue_next(deps, &job).await
}

/// Pause a schedule. Any dispatcher job already enqueued for it still
/// fires, but `run_dispatch` finds `status != Active` and drops it
/// without reschedule — pausing is advisory, not a cancellation of
/// in-flight work.
pub async fn pause_schedule(deps: &Deps, job_id: &str) -> Result<(), SchedulerError> {
  deps.store.set_schedule_status(job_id, ScheduledJobStatus::Paused).await?;
  Ok(())
}

/// Resume a paused schedule. If its `next_run_at` is already in the past,
/// fire as soon as a worker is free rather than waiting out a now-stale
/// delay.
pub async fn resume_schedule(deps: &Deps, job_id: &str) -> Result<(), SchedulerError> {
  let mut job = deps.store.get_schedule(job_id).await?;
  if job.status != ScheduledJobStatus::Paused {
    return Ok(());
  }
  job.status = ScheduledJobStatus::Active;
  if job.next_run_at <= Utc::now() {
    job.next_run_at = Utc::now();
  }
  deps.store.save_schedule(&job).await?;
  enqueue_next(deps, &job).await
}

/// End a schedule permanently. There is no hard-delete in the store —
/// `ScheduledJobStatus::Dead` is the terminal state both a retry-exhausted
/// job and a user-removed job land in, so this reuses it rather than
/// adding a parallel "removed" status (open question resolved this way:
/// both mean "stop firing, keep the row for history").
pub async fn delete_schedule(deps: &Deps, job_id: &str) -> Result<(), SchedulerError> {
  deps.store.set_schedule_status(job_id, ScheduledJobStatus::Dead).await?;
  Ok(())
}

/// Re-enqueue every active schedule after a process restart. The
/// in-memory reference dispatcher loses all pending delay-queue entries
/// on crash, so nothing re-fires on its own; this scans the durable
/// `scheduled_jobs` table and restores the queue. Safe to call
/// unconditionally at startup: `enqueue_next`'s deterministic ids make a
/// redundant call (job already enqueued by another process) a no-op on
/// any dispatcher backed by a deduplicating job id.
pub async fn recover(deps: &Deps) -> Result<(), SchedulerError> {
  for job in deps.store.list_active_schedules().await? {
    enqueue_next(deps, &job).await?;
  }
  Ok(())
}
