//! Orchestrator (C5): the engine core that drives one execution from its
//! trigger node to a terminal status (or an interrupt), tying together the
//! Builder, Graph Cache, Resolver, Component Registry, Broadcast fabric,
//! and Job Dispatcher behind the `run`/`resume`/`enqueue_execution`/
//! `cancel_execution` entry points a caller drives it through.

pub mod context;
pub mod convention;
pub mod error;
mod events;
mod subworkflow;
mod trim;
mod walk;

pub use context::Deps;
pub use error::OrchestratorError;
pub use walk::{DriveOutcome, Invocation, NodeStatus, StepResult};

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use serde_json::Value;

use pipelit_config::{Epic, Execution, ExecutionStatus};
use pipelit_graph_cache::{structural_hash, CacheKey};
use pipelit_state::{ExecutionState, Message, Trigger};

/// Create a `pending` execution row and enqueue it for a worker to pick
/// up. `trigger_node_id` defaults to the workflow's sole/lowest-id
/// trigger node when not given explicitly.
pub async fn enqueue_execution(
  deps: &Deps,
  workflow_slug: &str,
  trigger_node_id: Option<String>,
  trigger_payload: Value,
) -> Result<String, OrchestratorError> {
  let workflow = deps.store.get_workflow_by_slug(workflow_slug).await?;
  let trigger_node_id = match trigger_node_id {
    Some(id) => id,
    None => context::default_trigger_node(&workflow)
      .ok_or_else(|| OrchestratorError::NoTriggerNode(workflow.workflow_id.clone()))?,
  };

  let execution_id = uuid::Uuid::new_v4().to_string();
  let execution = Execution::new(
    execution_id.as_str(),
    workflow.workflow_id.as_str(),
    trigger_node_id.as_str(),
    trigger_payload,
    Utc::now(),
  );
  deps.store.create_execution(&execution).await?;
  deps
    .dispatcher
    .enqueue(context::WORKFLOW_QUEUE, &execution_id, serde_json::json!({"execution_id": execution_id}))
    .await;
  Ok(execution_id)
}

/// Mark `execution_id` cancelled, and cascade to every non-terminal child
/// execution it spawned via sub-workflow delegation.
pub async fn cancel_execution(deps: &Deps, execution_id: &str) -> Result<(), OrchestratorError> {
  let execution = deps.store.get_execution(execution_id).await?;
  if execution.status.is_terminal() {
    return Ok(());
  }
  deps
    .store
    .update_execution_status(execution_id, ExecutionStatus::Cancelled, None, Some(Utc::now()))
    .await?;
  let workflow = deps.store.get_workflow(&execution.workflow_id).await?;
  events::publish(
    deps,
    &workflow.slug,
    execution_id,
    "execution_cancelled",
    serde_json::json!({"execution_id": execution_id, "status": ExecutionStatus::Cancelled}),
  );

  let children = deps.store.list_child_executions(execution_id).await?;
  for child in children {
    if !child.status.is_terminal() {
      Box::pin(cancel_execution(deps, &child.execution_id)).await?;
    }
  }
  Ok(())
}

/// Claim and run an execution from its trigger node to a terminal status
/// or an interrupt.
pub async fn run(deps: &Deps, execution_id: &str) -> Result<ExecutionStatus, OrchestratorError> {
  if !deps.store.try_claim_execution(execution_id).await? {
    return Ok(deps.store.get_execution(execution_id).await?.status);
  }

  let execution = deps.store.get_execution(execution_id).await?;
  let workflow = deps.store.get_workflow(&execution.workflow_id).await?;
  let plan = load_plan(deps, &workflow, &execution.trigger_node_id)?;

  let mut epic = load_epic(deps, &execution).await?;
  let mut state = initial_state(deps, &execution).await?;

  let mut queue = VecDeque::new();
  let mut scheduled = HashSet::new();
  queue.push_back((execution.trigger_node_id.clone(), None));
  scheduled.insert(execution.trigger_node_id.clone());

  let outcome = walk::drive_queue(
    deps,
    &workflow.slug,
    execution_id,
    &mut epic,
    &plan,
    &mut state,
    queue,
    scheduled,
  )
  .await?;

  finish(deps, &workflow, &execution, state, outcome).await
}

/// Resume an execution previously interrupted on a sub-workflow
/// delegation, seeding the checkpointed node with `child_result` before
/// continuing the walk.
pub async fn resume(
  deps: &Deps,
  execution_id: &str,
  node_id: &str,
  child_result: Value,
) -> Result<ExecutionStatus, OrchestratorError> {
  let key = context::checkpoint_key(execution_id, node_id);
  let checkpoint = deps.checkpoints.get(&key).await?.ok_or_else(|| OrchestratorError::CheckpointLost {
    execution_id: execution_id.to_string(),
    node_id: node_id.to_string(),
  })?;
  let mut state: ExecutionState = serde_json::from_value(
    checkpoint
      .blob
      .get("state")
      .cloned()
      .ok_or_else(|| OrchestratorError::CheckpointLost {
        execution_id: execution_id.to_string(),
        node_id: node_id.to_string(),
      })?,
  )
  .map_err(|_| OrchestratorError::CheckpointLost {
    execution_id: execution_id.to_string(),
    node_id: node_id.to_string(),
  })?;

  let execution = deps.store.get_execution(execution_id).await?;
  let workflow = deps.store.get_workflow(&execution.workflow_id).await?;
  let plan = load_plan(deps, &workflow, &execution.trigger_node_id)?;
  let mut epic = load_epic(deps, &execution).await?;

  let planned = plan.node(node_id).ok_or_else(|| OrchestratorError::CheckpointLost {
    execution_id: execution_id.to_string(),
    node_id: node_id.to_string(),
  })?;

  let step = walk::execute_node(
    deps,
    &workflow.slug,
    execution_id,
    &mut epic,
    planned,
    &plan,
    &mut state,
    None,
    Invocation::Resume(child_result),
  )
  .await?;

  let mut queue = VecDeque::new();
  let mut scheduled = HashSet::new();
  scheduled.insert(node_id.to_string());
  for (next_id, code) in step.next {
    if scheduled.insert(next_id.clone()) {
      queue.push_back((next_id, code));
    }
  }

  let any_executed = matches!(step.status, NodeStatus::Success | NodeStatus::Failed);
  let mut outcome = walk::drive_queue(
    deps,
    &workflow.slug,
    execution_id,
    &mut epic,
    &plan,
    &mut state,
    queue,
    scheduled,
  )
  .await?;
  outcome.any_executed = outcome.any_executed || any_executed;
  if step.status == NodeStatus::Failed && outcome.first_failure.is_none() {
    outcome.first_failure = step.failure;
  }

  deps.checkpoints.delete(&key).await?;
  finish(deps, &workflow, &execution, state, outcome).await
}

pub(crate) fn load_plan(
  deps: &Deps,
  workflow: &pipelit_config::Workflow,
  trigger_node_id: &str,
) -> Result<pipelit_builder::Plan, OrchestratorError> {
  let key = CacheKey {
    workflow_id: workflow.workflow_id.clone(),
    trigger_node_id: trigger_node_id.to_string(),
    structural_hash: structural_hash(workflow),
  };
  deps
    .plans
    .get_or_build(key, || pipelit_builder::build(workflow, trigger_node_id, &deps.registry))
    .map_err(OrchestratorError::Build)
}

async fn load_epic(deps: &Deps, execution: &Execution) -> Result<Option<Epic>, OrchestratorError> {
  match &execution.epic_id {
    Some(epic_id) => Ok(Some(deps.store.get_epic(epic_id).await?)),
    None => Ok(None),
  }
}

/// Build the `ExecutionState` a fresh `run` starts from: durable thread
/// memory (if `thread_id` is set) preloaded as prior messages, then the
/// trigger payload appended as the first user message.
async fn initial_state(deps: &Deps, execution: &Execution) -> Result<ExecutionState, OrchestratorError> {
  let trigger_text = execution
    .trigger_payload
    .get("text")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();
  let trigger = Trigger {
    text: trigger_text.clone(),
    payload: execution.trigger_payload.clone(),
  };

  let mut state = ExecutionState::new(execution.execution_id.as_str(), trigger);
  state.thread_id = execution.thread_id.clone();
  state.parent_execution_id = execution.parent_execution_id.clone();
  state.parent_node_id = execution.parent_node_id.clone();

  if let Some(thread_id) = &execution.thread_id {
    if let Some(checkpoint) = deps.checkpoints.get(&context::thread_key(thread_id)).await? {
      if let Some(messages) = checkpoint.blob.get("messages").cloned() {
        if let Ok(messages) = serde_json::from_value::<Vec<Message>>(messages) {
          state.append_messages(messages);
        }
      }
    }
  }

  if !trigger_text.is_empty() {
    state.append_message(Message {
      id: format!("trigger-{}", execution.execution_id),
      role: "user".to_string(),
      content: Value::String(trigger_text),
    });
  }

  Ok(state)
}

/// Persist thread memory (if the execution has a thread) for the next
/// firing to preload.
async fn persist_thread_memory(deps: &Deps, state: &ExecutionState) -> Result<(), OrchestratorError> {
  let Some(thread_id) = &state.thread_id else { return Ok(()) };
  deps
    .checkpoints
    .put(
      &context::thread_key(thread_id),
      serde_json::json!({"messages": state.messages()}),
      Utc::now() + context::thread_memory_ttl(),
    )
    .await?;
  Ok(())
}

/// Decide the terminal (or interrupted) status from a `DriveOutcome` and
/// persist it, per the error-taxonomy propagation rules:
/// `COMPONENT_ERROR` always fails the execution even when an error-handler
/// workflow is configured (the handler is an additional side effect, not a
/// replacement); `BUDGET_EXCEEDED` completes gracefully unless nothing ran
/// at all; `CANCELLED` cascades to children; sub-workflow interrupts leave
/// the execution `Interrupted`, not terminal.
async fn finish(
  deps: &Deps,
  workflow: &pipelit_config::Workflow,
  execution: &Execution,
  state: ExecutionState,
  outcome: DriveOutcome,
) -> Result<ExecutionStatus, OrchestratorError> {
  if outcome.cancelled {
    let children = deps.store.list_child_executions(&execution.execution_id).await?;
    for child in children {
      if !child.status.is_terminal() {
        Box::pin(cancel_execution(deps, &child.execution_id)).await?;
      }
    }
    return Ok(ExecutionStatus::Cancelled);
  }

  if let Some((node_id, child_execution_id)) = outcome.interrupted_on {
    deps
      .store
      .update_execution_status(&execution.execution_id, ExecutionStatus::Interrupted, None, None)
      .await?;
    events::publish(
      deps,
      &workflow.slug,
      &execution.execution_id,
      "execution_interrupted",
      serde_json::json!({"execution_id": execution.execution_id, "node_id": node_id, "child_execution_id": child_execution_id}),
    );
    return Ok(ExecutionStatus::Interrupted);
  }

  let status = match &outcome.first_failure {
    Some(_) => ExecutionStatus::Failed,
    None if outcome.budget_exceeded && !outcome.any_executed => ExecutionStatus::Failed,
    None => ExecutionStatus::Completed,
  };

  let final_output = if status == ExecutionStatus::Completed {
    Some(serde_json::to_value(state.node_outputs()).unwrap_or(Value::Null))
  } else {
    None
  };

  deps
    .store
    .update_execution_status(&execution.execution_id, status, final_output.clone(), Some(Utc::now()))
    .await?;

  if status == ExecutionStatus::Failed {
    if let Some(handler_slug) = &workflow.error_handler_workflow_slug {
      let (code, message) = outcome.first_failure.clone().unwrap_or((
        pipelit_config::ErrorCode::BudgetExceeded,
        "execution stopped before any node ran".to_string(),
      ));
      let _ = enqueue_execution(
        deps,
        handler_slug,
        None,
        serde_json::json!({
          "text": message,
          "payload": {
            "failed_execution_id": execution.execution_id,
            "error_code": code,
          },
        }),
      )
      .await;
    }
  }

  persist_thread_memory(deps, &state).await?;

  let mut refreshed = execution.clone();
  refreshed.status = status;
  refreshed.final_output = final_output;
  subworkflow::notify_parent_if_waiting(deps, &refreshed).await;

  let event_type = if status == ExecutionStatus::Failed {
    "execution_failed"
  } else {
    "execution_completed"
  };
  events::publish(
    deps,
    &workflow.slug,
    &execution.execution_id,
    event_type,
    serde_json::json!({"execution_id": execution.execution_id, "status": status}),
  );

  Ok(status)
}
