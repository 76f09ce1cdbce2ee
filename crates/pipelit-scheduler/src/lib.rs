//! Scheduler (C7): the self-rescheduling recurring-job engine.
//!
//! Unlike an external cron, nothing outside this crate decides when a
//! scheduled workflow fires next — every dispatcher job computes its own
//! successor and re-enqueues itself. A component owns its own re-arming
//! rather than a central timer wheel driving it, with explicit
//! retry/backoff and
//! pause/resume/crash-recovery semantics.

mod dispatch;
mod error;
mod ids;
mod lifecycle;

pub use dispatch::{run_dispatch, SCHEDULER_QUEUE};
pub use error::SchedulerError;
pub use ids::{backoff, dispatch_job_id};
pub use lifecycle::{create_schedule, delete_schedule, pause_schedule, recover, resume_schedule};

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::sync::Arc;

  use async_trait::async_trait;
  use chrono::Utc;
  use serde_json::{json, Map};
  use sqlx::sqlite::SqlitePoolOptions;

  use pipelit_builder::Plan;
  use pipelit_component::{Component, ComponentError, ComponentRegistry, NodeTypeSpec, ResolvedConfig};
  use pipelit_config::{ComponentType, Node, PortType, ScheduledJob, ScheduledJobStatus, Workflow};
  use pipelit_graph_cache::GraphCache;
  use pipelit_orchestrator::Deps;
  use pipelit_queue::{InMemoryDispatcher, JobDispatcher};
  use pipelit_state::StateView;
  use pipelit_store::SqliteStore;

  use super::*;

  struct NoopTrigger;

  #[async_trait]
  impl Component for NoopTrigger {
    async fn execute(&self, _config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, serde_json::Value>, ComponentError> {
      Ok(Map::new())
    }
  }

  struct AlwaysFails;

  #[async_trait]
  impl Component for AlwaysFails {
    async fn execute(&self, _config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, serde_json::Value>, ComponentError> {
      Err(ComponentError::new("boom"))
    }
  }

  fn registry(fail: bool) -> ComponentRegistry {
    let spec = NodeTypeSpec::new(ComponentType::TriggerSchedule).with_output("text", PortType::String);
    let builder = ComponentRegistry::builder();
    if fail {
      builder.register(spec, AlwaysFails).build()
    } else {
      builder.register(spec, NoopTrigger).build()
    }
  }

  async fn workflow(store: &SqliteStore, slug: &str, fail: bool) -> Workflow {
    let mut nodes = HashMap::new();
    nodes.insert("t".to_string(), Node::new("t", ComponentType::TriggerSchedule));
    let workflow = Workflow {
      workflow_id: format!("{slug}-id"),
      slug: slug.to_string(),
      name: slug.to_string(),
      nodes,
      edges: vec![],
      deleted_at: None,
      error_handler_workflow_slug: None,
    };
    store.create_workflow(&workflow).await.unwrap();
    let _ = fail;
    workflow
  }

  async fn deps(fail: bool) -> (Deps, Arc<SqliteStore>) {
    let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.expect("in-memory sqlite");
    let store = Arc::new(SqliteStore::new(pool));
    store.migrate().await.expect("migrate");
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(InMemoryDispatcher::new());
    let bus = Arc::new(pipelit_broadcast::Bus::new());
    let plans = Arc::new(GraphCache::<Plan>::new());
    let deps = Deps::new(store.clone(), store.clone(), registry(fail), plans, dispatcher, bus);

    // A background worker standing in for the process-level worker pool
    // that would otherwise drain the workflow queue: `fire` only enqueues
    // the execution, something else has to actually run it.
    let worker_deps = deps.clone();
    tokio::spawn(async move {
      loop {
        let job = worker_deps.dispatcher.dequeue(pipelit_orchestrator::context::WORKFLOW_QUEUE).await;
        let run_deps = worker_deps.clone();
        tokio::spawn(async move {
          let execution_id = job.payload["execution_id"].as_str().unwrap().to_string();
          let _ = pipelit_orchestrator::run(&run_deps, &execution_id).await;
        });
      }
    });

    (deps, store)
  }

  fn job(workflow_id: &str, max_retries: u32) -> ScheduledJob {
    ScheduledJob {
      job_id: "job-1".to_string(),
      workflow_id: workflow_id.to_string(),
      trigger_node_id: "t".to_string(),
      interval_seconds: 10,
      total_repeats: 0,
      max_retries,
      timeout_seconds: 5,
      trigger_payload: Some(json!({})),
      status: ScheduledJobStatus::Active,
      current_repeat: 0,
      current_retry: 0,
      last_run_at: None,
      next_run_at: Utc::now(),
      run_count: 0,
      error_count: 0,
      last_error: None,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn successful_firing_reschedules_after_the_interval_and_resets_retry() {
    let (deps, store) = deps(false).await;
    let wf = workflow(&store, "s1", false).await;
    create_schedule(&deps, job(&wf.workflow_id, 3)).await.unwrap();

    // One job should already be queued for "now".
    let queued = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    run_dispatch(&deps, queued.payload["job_id"].as_str().unwrap()).await.unwrap();

    let saved = store.get_schedule("job-1").await.unwrap();
    assert_eq!(saved.run_count, 1);
    assert_eq!(saved.current_repeat, 1);
    assert_eq!(saved.current_retry, 0);
    assert_eq!(saved.status, ScheduledJobStatus::Active);

    // Next firing must be scheduled roughly `interval_seconds` out.
    let delta = saved.next_run_at - saved.last_run_at.unwrap();
    assert_eq!(delta.num_seconds(), 10);
  }

  #[tokio::test(start_paused = true)]
  async fn dispatch_job_ids_match_scenario_s5_backoff_sequence() {
    let (deps, store) = deps(true).await;
    let wf = workflow(&store, "s5", true).await;
    create_schedule(&deps, job(&wf.workflow_id, 3)).await.unwrap();

    // First attempt fails -> retry 1, backoff 20s.
    let first = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    assert_eq!(first.job_id, "sched-job-1-n0-rc0");
    run_dispatch(&deps, first.payload["job_id"].as_str().unwrap()).await.unwrap();
    let after_first = store.get_schedule("job-1").await.unwrap();
    assert_eq!(after_first.current_retry, 1);
    assert_eq!(after_first.status, ScheduledJobStatus::Active);

    let second = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    assert_eq!(second.job_id, "sched-job-1-n0-rc1");
    run_dispatch(&deps, second.payload["job_id"].as_str().unwrap()).await.unwrap();
    let after_second = store.get_schedule("job-1").await.unwrap();
    assert_eq!(after_second.current_retry, 2);
    let delay = after_second.next_run_at - after_second.last_run_at.unwrap();
    assert_eq!(delay.num_seconds(), 40);

    let third = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    assert_eq!(third.job_id, "sched-job-1-n0-rc2");
    run_dispatch(&deps, third.payload["job_id"].as_str().unwrap()).await.unwrap();
    let after_third = store.get_schedule("job-1").await.unwrap();
    assert_eq!(after_third.status, ScheduledJobStatus::Dead);
    assert_eq!(after_third.current_retry, 3);
  }

  #[tokio::test(start_paused = true)]
  async fn paused_schedule_drops_its_dispatch_without_rescheduling() {
    let (deps, store) = deps(false).await;
    let wf = workflow(&store, "s2", false).await;
    create_schedule(&deps, job(&wf.workflow_id, 3)).await.unwrap();
    pause_schedule(&deps, "job-1").await.unwrap();

    let queued = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    run_dispatch(&deps, queued.payload["job_id"].as_str().unwrap()).await.unwrap();

    let saved = store.get_schedule("job-1").await.unwrap();
    assert_eq!(saved.run_count, 0, "paused job must not be fired");
    assert_eq!(saved.status, ScheduledJobStatus::Paused);
  }

  #[tokio::test(start_paused = true)]
  async fn resuming_a_paused_schedule_re_enqueues_it() {
    let (deps, store) = deps(false).await;
    let wf = workflow(&store, "s3", false).await;
    create_schedule(&deps, job(&wf.workflow_id, 3)).await.unwrap();
    pause_schedule(&deps, "job-1").await.unwrap();
    // Drain and discard the pre-pause dispatch.
    let _ = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;

    resume_schedule(&deps, "job-1").await.unwrap();
    let queued = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    run_dispatch(&deps, queued.payload["job_id"].as_str().unwrap()).await.unwrap();

    let saved = store.get_schedule("job-1").await.unwrap();
    assert_eq!(saved.run_count, 1);
    assert_eq!(saved.status, ScheduledJobStatus::Active);
  }

  #[tokio::test(start_paused = true)]
  async fn deleted_schedule_is_marked_dead_and_stays_dormant() {
    let (deps, store) = deps(false).await;
    let wf = workflow(&store, "s4", false).await;
    create_schedule(&deps, job(&wf.workflow_id, 3)).await.unwrap();
    delete_schedule(&deps, "job-1").await.unwrap();

    let queued = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    run_dispatch(&deps, queued.payload["job_id"].as_str().unwrap()).await.unwrap();

    let saved = store.get_schedule("job-1").await.unwrap();
    assert_eq!(saved.run_count, 0);
    assert_eq!(saved.status, ScheduledJobStatus::Dead);
  }

  #[tokio::test(start_paused = true)]
  async fn recover_requeues_every_active_schedule_after_a_restart() {
    let (deps, store) = deps(false).await;
    let wf = workflow(&store, "s6", false).await;
    let mut j = job(&wf.workflow_id, 3);
    j.job_id = "job-recover".to_string();
    store.create_schedule(&j).await.unwrap();
    // Simulate a crash: the in-memory dispatcher above never saw this job.

    recover(&deps).await.unwrap();
    let queued = deps.dispatcher.dequeue(SCHEDULER_QUEUE).await;
    assert_eq!(queued.job_id, "sched-job-recover-n0-rc0");
  }
}
