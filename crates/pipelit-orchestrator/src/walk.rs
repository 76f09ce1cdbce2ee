//! The execution-order walk: one node at a time, in a
//! deterministic topological order, with skip propagation, budget gating,
//! and the output convention applied before a node counts as "done".

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};

use pipelit_component::{ComponentError, ResolvedConfig};
use pipelit_config::{ComponentType, Edge, Epic, ErrorCode, ExecutionLog};
use pipelit_state::{ExecutionState, NodeOutcome};

use pipelit_builder::Plan;

use crate::context::Deps;
use crate::convention::{apply_output_convention, ConventionOutcome};
use crate::error::OrchestratorError;
use crate::events;
use crate::trim;

/// How a node in the walk is invoked: normally, or resumed after a
/// sub-workflow it delegated to has completed.
pub enum Invocation {
  Fresh,
  Resume(Value),
}

/// What happened to one node, and what should run next.
pub struct StepResult {
  pub status: NodeStatus,
  pub next: Vec<(String, Option<ErrorCode>)>,
  pub failure: Option<(ErrorCode, String)>,
  pub waiting_child_id: Option<String>,
  /// Set when this node itself (not a cascaded upstream skip) stopped
  /// because the epic's budget would have been exceeded.
  pub budget_exceeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
  Success,
  Failed,
  Skipped,
  Waiting,
}

/// The result of driving the queue to completion, to an interrupt, or to
/// an observed cancellation.
pub struct DriveOutcome {
  pub any_executed: bool,
  pub first_failure: Option<(ErrorCode, String)>,
  pub interrupted_on: Option<(String, String)>, // (node_id, child_execution_id)
  pub cancelled: bool,
  pub budget_exceeded: bool,
}

pub async fn drive_queue(
  deps: &Deps,
  workflow_slug: &str,
  execution_id: &str,
  epic: &mut Option<Epic>,
  plan: &Plan,
  state: &mut ExecutionState,
  mut queue: VecDeque<(String, Option<ErrorCode>)>,
  mut scheduled: HashSet<String>,
) -> Result<DriveOutcome, OrchestratorError> {
  let mut any_executed = false;
  let mut first_failure = None;
  let mut budget_exceeded = false;

  while let Some((node_id, forced)) = queue.pop_front() {
    if deps.store.get_execution(execution_id).await?.status == pipelit_config::ExecutionStatus::Cancelled {
      return Ok(DriveOutcome {
        any_executed,
        first_failure,
        interrupted_on: None,
        cancelled: true,
        budget_exceeded,
      });
    }

    let Some(planned) = plan.node(&node_id) else { continue };

    let step = execute_node(
      deps,
      workflow_slug,
      execution_id,
      epic,
      planned,
      plan,
      state,
      forced,
      Invocation::Fresh,
    )
    .await?;

    if matches!(step.status, NodeStatus::Success | NodeStatus::Failed) {
      any_executed = true;
    }
    if step.status == NodeStatus::Failed && first_failure.is_none() {
      first_failure = step.failure.clone();
    }
    if step.budget_exceeded {
      budget_exceeded = true;
    }
    if step.status == NodeStatus::Waiting {
      return Ok(DriveOutcome {
        any_executed,
        first_failure,
        interrupted_on: Some((node_id, step.waiting_child_id.unwrap())),
        cancelled: false,
        budget_exceeded,
      });
    }

    for (next_id, code) in step.next {
      if scheduled.insert(next_id.clone()) {
        queue.push_back((next_id, code));
      }
    }
  }

  Ok(DriveOutcome {
    any_executed,
    first_failure,
    interrupted_on: None,
    cancelled: false,
    budget_exceeded,
  })
}

/// Run (or resume) exactly one node and decide what runs next.
#[allow(clippy::too_many_arguments)]
pub async fn execute_node(
  deps: &Deps,
  workflow_slug: &str,
  execution_id: &str,
  epic: &mut Option<Epic>,
  planned: &pipelit_builder::PlannedNode,
  plan: &Plan,
  state: &mut ExecutionState,
  forced_skip: Option<ErrorCode>,
  invocation: Invocation,
) -> Result<StepResult, OrchestratorError> {
  let node_id = planned.node_id.clone();

  if let Some(code) = forced_skip {
    return finish_skip(deps, workflow_slug, execution_id, plan, state, &node_id, code).await;
  }

  if budget_blocks(epic, planned) {
    return finish_skip(deps, workflow_slug, execution_id, plan, state, &node_id, ErrorCode::BudgetExceeded).await;
  }

  events::publish(
    deps,
    workflow_slug,
    execution_id,
    "node_status",
    serde_json::json!({"execution_id": execution_id, "node_id": node_id, "status": "running"}),
  );

  let context = state.resolver_context();
  let (resolved_prompt, resolved_extra) =
    deps.resolver.resolve_node_config(planned.system_prompt.as_deref(), &planned.extra_config, &context);
  let resolved_config = ResolvedConfig {
    system_prompt: resolved_prompt,
    extra_config: resolved_extra,
  };

  let component = deps
    .registry
    .component(planned.component_type)
    .expect("builder rejects plans referencing an unregistered component type");

  let wants_messages = deps
    .registry
    .spec(planned.component_type)
    .map(|spec| spec.inputs.iter().any(|p| p.port_type == pipelit_config::PortType::Messages))
    .unwrap_or(false);

  let trimmed_state;
  let state_for_view: &ExecutionState = if wants_messages {
    let window = trim::context_window_for(
      planned.model_ref.as_deref(),
      extract_context_window(&planned.extra_config),
      &deps.model_windows,
    );
    let trimmed = trim::trim_messages(
      state.messages(),
      resolved_config.system_prompt.as_deref(),
      window,
      trim::DEFAULT_OUTPUT_RESERVE,
    );
    trimmed_state = state.with_trimmed_messages(trimmed);
    &trimmed_state
  } else {
    state
  };

  let started = Instant::now();
  let outcome: Result<Map<String, Value>, ComponentError> = match invocation {
    Invocation::Fresh => component.execute(&resolved_config, state_for_view.view()).await,
    Invocation::Resume(child_result) => component.resume(&resolved_config, state_for_view.view(), child_result).await,
  };
  let duration_ms = started.elapsed().as_millis() as u64;

  let (raw_map, exec_error) = match outcome {
    Ok(map) => (map, None),
    Err(err) => (Map::new(), Some((err.code, err.message))),
  };

  let convention = apply_output_convention(raw_map.clone());

  if let Some(usage) = &convention.token_usage {
    deps.store.add_execution_spend(execution_id, usage.tokens, usage.usd).await?;
    if let Some(e) = epic.as_mut() {
      deps.store.add_epic_spend(&e.epic_id, usage.tokens, usage.usd).await?;
      e.spent_tokens += usage.tokens;
      e.spent_usd += usage.usd;
    }
  }

  if let Some((code, message)) = exec_error.or_else(|| convention.error.clone().map(|e| (ErrorCode::ComponentError, e))) {
    return finish_failure(deps, workflow_slug, execution_id, plan, state, &node_id, code, message, duration_ms, raw_map).await;
  }

  if let Some(request) = &convention.subworkflow {
    state.set_node_result(
      node_id.as_str(),
      NodeOutcome {
        status: "waiting".to_string(),
        error: None,
        error_code: None,
        metadata: Value::Object(raw_map.clone()),
        duration_ms,
      },
    );
    let execution = deps.store.get_execution(execution_id).await?;
    let child_id = crate::subworkflow::delegate(deps, &execution, &node_id, state, request).await?;
    events::publish(
      deps,
      workflow_slug,
      execution_id,
      "node_status",
      serde_json::json!({"execution_id": execution_id, "node_id": node_id, "status": "waiting"}),
    );
    return Ok(StepResult {
      status: NodeStatus::Waiting,
      next: Vec::new(),
      failure: None,
      waiting_child_id: Some(child_id),
      budget_exceeded: false,
    });
  }

  apply_success(state, &node_id, &convention);

  let log = ExecutionLog {
    execution_id: execution_id.to_string(),
    node_id: node_id.clone(),
    status: "success".to_string(),
    input: Value::Object(Map::new()),
    output: Some(Value::Object(convention.node_outputs.clone())),
    error: None,
    error_code: None,
    metadata: Value::Object(raw_map),
    duration_ms,
    timestamp: Utc::now(),
  };
  deps.store.append_log(&log).await?;

  events::publish(
    deps,
    workflow_slug,
    execution_id,
    "node_status",
    serde_json::json!({
      "execution_id": execution_id, "node_id": node_id, "status": "success",
      "output": convention.node_outputs, "duration_ms": duration_ms,
    }),
  );

  let next = next_targets(plan, planned.component_type, &node_id, state.route());
  Ok(StepResult {
    status: NodeStatus::Success,
    next,
    failure: None,
    waiting_child_id: None,
    budget_exceeded: false,
  })
}

fn apply_success(state: &mut ExecutionState, node_id: &str, convention: &ConventionOutcome) {
  state.set_node_output(node_id, convention.node_outputs.clone());
  if let Some(route) = &convention.route {
    state.set_route(route.clone());
  }
  if !convention.messages.is_empty() {
    state.append_messages(convention.messages.clone());
  }
  if let Some(patch) = &convention.state_patch {
    state.merge_state_patch(patch.clone());
  }
}

#[allow(clippy::too_many_arguments)]
async fn finish_failure(
  deps: &Deps,
  workflow_slug: &str,
  execution_id: &str,
  plan: &Plan,
  state: &mut ExecutionState,
  node_id: &str,
  code: ErrorCode,
  message: String,
  duration_ms: u64,
  raw_map: Map<String, Value>,
) -> Result<StepResult, OrchestratorError> {
  state.set_node_result(
    node_id,
    NodeOutcome {
      status: "failed".to_string(),
      error: Some(message.clone()),
      error_code: Some(code),
      metadata: Value::Object(raw_map.clone()),
      duration_ms,
    },
  );

  let log = ExecutionLog {
    execution_id: execution_id.to_string(),
    node_id: node_id.to_string(),
    status: "failed".to_string(),
    input: Value::Object(Map::new()),
    output: None,
    error: Some(message.clone()),
    error_code: Some(code),
    metadata: Value::Object(raw_map),
    duration_ms,
    timestamp: Utc::now(),
  };
  deps.store.append_log(&log).await?;

  events::publish(
    deps,
    workflow_slug,
    execution_id,
    "node_status",
    serde_json::json!({"execution_id": execution_id, "node_id": node_id, "status": "failed", "error": message, "error_code": code}),
  );

  let next = downstream_targets(plan, node_id);
  Ok(StepResult {
    status: NodeStatus::Failed,
    next: next.into_iter().map(|id| (id, Some(ErrorCode::UpstreamFailed))).collect(),
    failure: Some((code, message)),
    waiting_child_id: None,
    budget_exceeded: false,
  })
}

async fn finish_skip(
  deps: &Deps,
  workflow_slug: &str,
  execution_id: &str,
  plan: &Plan,
  state: &mut ExecutionState,
  node_id: &str,
  code: ErrorCode,
) -> Result<StepResult, OrchestratorError> {
  state.set_node_result(
    node_id,
    NodeOutcome {
      status: "skipped".to_string(),
      error: None,
      error_code: Some(code),
      metadata: Value::Null,
      duration_ms: 0,
    },
  );

  let log = ExecutionLog {
    execution_id: execution_id.to_string(),
    node_id: node_id.to_string(),
    status: "skipped".to_string(),
    input: Value::Object(Map::new()),
    output: None,
    error: None,
    error_code: Some(code),
    metadata: Value::Null,
    duration_ms: 0,
    timestamp: Utc::now(),
  };
  deps.store.append_log(&log).await?;

  events::publish(
    deps,
    workflow_slug,
    execution_id,
    "node_status",
    serde_json::json!({"execution_id": execution_id, "node_id": node_id, "status": "skipped", "error_code": code}),
  );

  let next = downstream_targets(plan, node_id);
  Ok(StepResult {
    status: NodeStatus::Skipped,
    next: next.into_iter().map(|id| (id, Some(ErrorCode::UpstreamFailed))).collect(),
    failure: None,
    waiting_child_id: None,
    budget_exceeded: code == ErrorCode::BudgetExceeded,
  })
}

/// Targets to traverse when a node did *not* run (skipped/failed): since
/// no `_route` was produced, a skipped switch can't pick a branch, so
/// every outgoing edge (conditional or direct) is treated as reachable
/// and marked `skipped` in turn. See DESIGN.md.
fn downstream_targets(plan: &Plan, node_id: &str) -> Vec<String> {
  plan.outgoing(node_id).iter().map(|e: &Edge| e.target_node_id.clone()).collect()
}

/// Targets to traverse after a node ran successfully: a switch picks
/// exactly one edge via `state.route`; everything else follows
/// every direct outgoing edge in adjacency order.
fn next_targets(plan: &Plan, component_type: ComponentType, node_id: &str, route: &str) -> Vec<(String, Option<ErrorCode>)> {
  if component_type.may_route() {
    let Some(switch_route) = plan.switch_route(node_id) else {
      return Vec::new();
    };
    let target = switch_route
      .conditions
      .iter()
      .find(|(value, _)| value == route)
      .map(|(_, target)| target.clone())
      .or_else(|| switch_route.default_target.clone());
    return target.into_iter().map(|t| (t, None)).collect();
  }
  plan.outgoing(node_id).iter().map(|e| (e.target_node_id.clone(), None)).collect()
}

fn budget_blocks(epic: &Option<Epic>, planned: &pipelit_builder::PlannedNode) -> bool {
  let Some(epic) = epic.as_ref() else { return false };
  let estimated = planned
    .extra_config
    .get("estimated_tokens")
    .and_then(Value::as_u64)
    .unwrap_or(0);
  epic.would_exceed(estimated)
}

fn extract_context_window(extra_config: &std::collections::HashMap<String, Value>) -> Option<u64> {
  extra_config.get("context_window").and_then(Value::as_u64)
}
