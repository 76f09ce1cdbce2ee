//! Sub-workflow delegation, the "spawn-and-await" primitive.
//! `delegate` is called when a component returns `_subworkflow`;
//! `notify_parent` is called from the tail of `run`/`resume` whenever a
//! terminal execution has a parent waiting on it.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use pipelit_config::{Execution, ExecutionStatus};
use pipelit_state::ExecutionState;

use crate::context::{checkpoint_key, checkpoint_ttl, default_trigger_node, Deps, WORKFLOW_QUEUE};
use crate::convention::SubworkflowRequest;
use crate::error::OrchestratorError;

/// Create the child execution, write the parent's resumption checkpoint,
/// and enqueue the child. Returns the child's execution id.
pub async fn delegate(
  deps: &Deps,
  parent: &Execution,
  node_id: &str,
  state: &ExecutionState,
  request: &SubworkflowRequest,
) -> Result<String, OrchestratorError> {
  let child_workflow = deps.store.get_workflow_by_slug(&request.workflow_slug).await?;
  let trigger_node_id = default_trigger_node(&child_workflow)
    .ok_or_else(|| OrchestratorError::NoTriggerNode(child_workflow.workflow_id.clone()))?;

  let child_id = Uuid::new_v4().to_string();
  let trigger_payload = json!({
    "text": request.input_text,
    "payload": request.input_data.clone().unwrap_or(Value::Null),
    "parent_execution_id": parent.execution_id,
    "user_context": state.user_context(),
  });

  let mut child = Execution::new(
    child_id.as_str(),
    child_workflow.workflow_id.as_str(),
    trigger_node_id.as_str(),
    trigger_payload,
    Utc::now(),
  );
  child.parent_execution_id = Some(parent.execution_id.clone());
  child.parent_node_id = Some(node_id.to_string());
  child.epic_id = parent.epic_id.clone();
  child.task_id = request.task_id.clone().or_else(|| parent.task_id.clone());
  deps.store.create_execution(&child).await?;

  let checkpoint_blob = json!({
    "state": state,
    "pending_child_id": child_id,
  });
  deps
    .checkpoints
    .put(&checkpoint_key(&parent.execution_id, node_id), checkpoint_blob, Utc::now() + checkpoint_ttl())
    .await?;

  deps
    .dispatcher
    .enqueue(WORKFLOW_QUEUE, &child_id, json!({"execution_id": child_id}))
    .await;

  Ok(child_id)
}

/// Build the `child_result` payload delivered to the resumed parent node.
pub async fn child_result_for(deps: &Deps, child: &Execution) -> Value {
  match child.status {
    ExecutionStatus::Completed => json!({
      "status": "completed",
      "output": terminal_output(deps, child).await,
    }),
    ExecutionStatus::Failed => json!({
      "status": "failed",
      "error": "sub-workflow execution failed",
      "error_code": "COMPONENT_ERROR",
    }),
    ExecutionStatus::Cancelled => json!({
      "status": "cancelled",
      "error": "sub-workflow execution cancelled",
      "error_code": "CANCELLED",
    }),
    other => json!({"status": format!("{other:?}")}),
  }
}

/// Reduce a completed child's node-keyed `final_output` map down to the
/// single value the delegating node actually cares about: the output of
/// the child's terminal node (the one with no further dataflow edges in
/// its own plan), unwrapped from its canonical `output` key when present.
/// Falls back to the raw map on any lookup failure or ambiguity (more than
/// one terminal node).
async fn terminal_output(deps: &Deps, child: &Execution) -> Value {
  let Some(final_output) = &child.final_output else {
    return Value::Null;
  };
  let Some(map) = final_output.as_object() else {
    return final_output.clone();
  };

  let workflow = match deps.store.get_workflow(&child.workflow_id).await {
    Ok(w) => w,
    Err(_) => return final_output.clone(),
  };
  let plan = match crate::load_plan(deps, &workflow, &child.trigger_node_id) {
    Ok(p) => p,
    Err(_) => return final_output.clone(),
  };

  let terminals: Vec<&String> = map.keys().filter(|id| plan.outgoing(id.as_str()).is_empty()).collect();
  let [terminal_node_id] = terminals.as_slice() else {
    return final_output.clone();
  };
  let Some(node_map) = map.get(*terminal_node_id).and_then(Value::as_object) else {
    return final_output.clone();
  };
  match node_map.get("output") {
    Some(scalar) => scalar.clone(),
    None => Value::Object(node_map.clone()),
  }
}

/// If `execution` has a parent waiting on it and just reached a terminal
/// status, re-enqueue the parent node with the child's result. The
/// deterministic job id makes the re-enqueue idempotent if the same
/// completion is observed twice.
pub async fn notify_parent_if_waiting(deps: &Deps, execution: &Execution) {
  let (Some(parent_execution_id), Some(parent_node_id)) = (&execution.parent_execution_id, &execution.parent_node_id)
  else {
    return;
  };
  let job_id = format!("resume-{parent_execution_id}-{parent_node_id}");
  let payload = json!({
    "parent_execution_id": parent_execution_id,
    "parent_node_id": parent_node_id,
    "child_execution_id": execution.execution_id,
    "child_result": child_result_for(deps, execution).await,
  });
  deps.dispatcher.enqueue("resume", &job_id, payload).await;
}
