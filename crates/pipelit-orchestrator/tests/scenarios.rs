//! End-to-end scenario tests driving the orchestrator through a real
//! `SqliteStore` + `InMemoryDispatcher` + `Bus`, the way a worker pool
//! would. Each test exercises one concrete execution shape (a trivial
//! chat turn, switch routing, budget exhaustion, sub-workflow delegation)
//! plus the invariants that fall out of driving them (output convention,
//! switch exhaustiveness, ordering).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use pipelit_builder::Plan;
use pipelit_broadcast::{workflow_channel, Event};
use pipelit_component::{Component, ComponentError, ComponentRegistry, NodeTypeSpec, ResolvedConfig};
use pipelit_config::{ComponentType, Edge, EdgeLabel, EdgeType, ExecutionStatus, Node, PortType, Workflow};
use pipelit_graph_cache::GraphCache;
use pipelit_orchestrator::{context, Deps};
use pipelit_queue::{InMemoryDispatcher, JobDispatcher};
use pipelit_state::StateView;
use pipelit_store::SqliteStore;

struct TriggerEcho;

#[async_trait]
impl Component for TriggerEcho {
  async fn execute(&self, _config: &ResolvedConfig, state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([("text".to_string(), json!(state.trigger().text))]))
  }
}

struct EchoAgent;

#[async_trait]
impl Component for EchoAgent {
  async fn execute(&self, config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([(
      "output".to_string(),
      json!(config.system_prompt.clone().unwrap_or_default()),
    )]))
  }
}

struct FixedRoute(&'static str);

#[async_trait]
impl Component for FixedRoute {
  async fn execute(&self, _config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([("_route".to_string(), json!(self.0))]))
  }
}

struct MarkRan;

#[async_trait]
impl Component for MarkRan {
  async fn execute(&self, _config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([("ran".to_string(), json!(true))]))
  }
}

struct DelegatingAgent;

#[async_trait]
impl Component for DelegatingAgent {
  async fn execute(&self, config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    if config.system_prompt.as_deref() == Some("delegate") {
      return Ok(Map::from_iter([(
        "_subworkflow".to_string(),
        json!({"workflow_slug": "child", "input_text": "go"}),
      )]));
    }
    Ok(Map::from_iter([(
      "output".to_string(),
      json!(config.system_prompt.clone().unwrap_or_default()),
    )]))
  }

  async fn resume(&self, _config: &ResolvedConfig, _state: StateView<'_>, child_result: Value) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([(
      "output".to_string(),
      child_result.get("output").cloned().unwrap_or(Value::Null),
    )]))
  }
}

fn registry() -> ComponentRegistry {
  ComponentRegistry::builder()
    .register(NodeTypeSpec::new(ComponentType::TriggerChat).with_output("text", PortType::String), TriggerEcho)
    .register(
      NodeTypeSpec::new(ComponentType::Agent)
        .with_output("output", PortType::String)
        .requires(pipelit_component::SubComponentKind::Model),
      EchoAgent,
    )
    .register(NodeTypeSpec::new(ComponentType::Switch).with_input("value", PortType::Any, true), FixedRoute("y"))
    .register(NodeTypeSpec::new(ComponentType::Tool).with_output("result", PortType::Object), MarkRan)
    .build()
}

fn delegating_registry() -> ComponentRegistry {
  ComponentRegistry::builder()
    .register(NodeTypeSpec::new(ComponentType::TriggerChat).with_output("text", PortType::String), TriggerEcho)
    .register(
      NodeTypeSpec::new(ComponentType::Agent)
        .with_output("output", PortType::String)
        .requires(pipelit_component::SubComponentKind::Model),
      DelegatingAgent,
    )
    .build()
}

async fn pool() -> SqlitePool {
  SqlitePoolOptions::new().connect("sqlite::memory:").await.expect("in-memory sqlite")
}

async fn harness(registry: ComponentRegistry, pool: SqlitePool) -> (Deps, Arc<SqliteStore>) {
  let store = Arc::new(SqliteStore::new(pool));
  store.migrate().await.expect("migrate");
  let dispatcher: Arc<dyn JobDispatcher> = Arc::new(InMemoryDispatcher::new());
  let bus = Arc::new(pipelit_broadcast::Bus::new());
  let plans = Arc::new(GraphCache::<Plan>::new());
  let deps = Deps::new(store.clone(), store.clone(), registry, plans, dispatcher, bus);
  (deps, store)
}

fn agent_node(id: &str, system_prompt: &str, estimated_tokens: Option<u64>) -> Node {
  let mut node = Node::new(id, ComponentType::Agent);
  node.system_prompt = Some(system_prompt.to_string());
  node.model_credential_id = Some("model-1".to_string());
  if let Some(tokens) = estimated_tokens {
    node.extra_config.insert("estimated_tokens".to_string(), json!(tokens));
  }
  node
}

async fn run_one(deps: &Deps) -> ExecutionStatus {
  let job = deps.dispatcher.dequeue(context::WORKFLOW_QUEUE).await;
  let execution_id = job.payload["execution_id"].as_str().unwrap().to_string();
  pipelit_orchestrator::run(deps, &execution_id).await.unwrap()
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<Event>) -> Vec<Event> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

#[tokio::test]
async fn trivial_chat_echoes_the_trigger_through_an_agent() {
  let (deps, _store) = harness(registry(), pool().await).await;

  let mut nodes = HashMap::new();
  nodes.insert("T".to_string(), Node::new("T", ComponentType::TriggerChat));
  nodes.insert("A".to_string(), agent_node("A", "Echo: {{ trigger.text }}", None));
  let workflow = Workflow {
    workflow_id: "wf-chat".to_string(),
    slug: "chat".to_string(),
    name: "chat".to_string(),
    nodes,
    edges: vec![Edge::direct("e1", "T", "A")],
    deleted_at: None,
    error_handler_workflow_slug: None,
  };
  deps.store.create_workflow(&workflow).await.unwrap();

  let mut events = deps.bus.subscribe(&workflow_channel("chat"));
  let execution_id = pipelit_orchestrator::enqueue_execution(&deps, "chat", None, json!({"text": "hi"})).await.unwrap();
  let status = run_one(&deps).await;
  assert_eq!(status, ExecutionStatus::Completed);

  let seen = drain(&mut events);
  let types: Vec<&str> = seen.iter().map(|e| e.event_type.as_str()).collect();
  assert_eq!(
    types,
    vec!["node_status", "node_status", "node_status", "node_status", "execution_completed"]
  );
  assert_eq!(seen[0].data["node_id"], "T");
  assert_eq!(seen[0].data["status"], "running");
  assert_eq!(seen[1].data["node_id"], "T");
  assert_eq!(seen[1].data["status"], "success");
  assert_eq!(seen[1].data["output"]["text"], "hi");
  assert_eq!(seen[2].data["node_id"], "A");
  assert_eq!(seen[2].data["status"], "running");
  assert_eq!(seen[3].data["node_id"], "A");
  assert_eq!(seen[3].data["status"], "success");
  assert_eq!(seen[3].data["output"]["output"], "Echo: hi");

  let execution = deps.store.get_execution(&execution_id).await.unwrap();
  let final_output = execution.final_output.unwrap();
  assert_eq!(final_output["T"]["text"], "hi");
  assert_eq!(final_output["A"]["output"], "Echo: hi");
}

#[tokio::test]
async fn switch_runs_only_the_matched_branch() {
  let (deps, _store) = harness(registry(), pool().await).await;

  let mut nodes = HashMap::new();
  nodes.insert("T".to_string(), Node::new("T", ComponentType::TriggerChat));
  nodes.insert("S".to_string(), Node::new("S", ComponentType::Switch));
  nodes.insert("A".to_string(), Node::new("A", ComponentType::Tool));
  nodes.insert("B".to_string(), Node::new("B", ComponentType::Tool));
  nodes.insert("C".to_string(), Node::new("C", ComponentType::Tool));
  let edges = vec![
    Edge::direct("e-ts", "T", "S"),
    Edge {
      edge_id: "e-sa".to_string(),
      source_node_id: "S".to_string(),
      target_node_id: "A".to_string(),
      edge_type: EdgeType::Conditional,
      edge_label: EdgeLabel::None,
      condition_value: Some("x".to_string()),
      priority: 0,
    },
    Edge {
      edge_id: "e-sb".to_string(),
      source_node_id: "S".to_string(),
      target_node_id: "B".to_string(),
      edge_type: EdgeType::Conditional,
      edge_label: EdgeLabel::None,
      condition_value: Some("y".to_string()),
      priority: 0,
    },
    Edge {
      edge_id: "e-sc".to_string(),
      source_node_id: "S".to_string(),
      target_node_id: "C".to_string(),
      edge_type: EdgeType::Conditional,
      edge_label: EdgeLabel::None,
      condition_value: None,
      priority: 0,
    },
  ];
  let workflow = Workflow {
    workflow_id: "wf-switch".to_string(),
    slug: "switch".to_string(),
    name: "switch".to_string(),
    nodes,
    edges,
    deleted_at: None,
    error_handler_workflow_slug: None,
  };
  deps.store.create_workflow(&workflow).await.unwrap();

  let execution_id = pipelit_orchestrator::enqueue_execution(&deps, "switch", None, json!({"text": "anything"})).await.unwrap();
  let status = run_one(&deps).await;
  assert_eq!(status, ExecutionStatus::Completed);

  let execution = deps.store.get_execution(&execution_id).await.unwrap();
  let final_output = execution.final_output.unwrap();
  assert!(final_output.get("B").is_some(), "matched branch must run");
  assert!(final_output.get("A").is_none(), "unmatched branch must not run");
  assert!(final_output.get("C").is_none(), "default branch loses to an explicit match");

  let logs = deps.store.list_logs(&execution_id).await.unwrap();
  assert!(logs.iter().all(|l| l.node_id != "A" && l.node_id != "C"), "A and C must not even appear as skipped");
}

#[tokio::test]
async fn budget_exceeded_skips_the_node_and_its_downstream_but_completes() {
  let pool = pool().await;
  let (deps, _store) = harness(registry(), pool.clone()).await;

  sqlx::query("INSERT INTO epics (epic_id, title, budget_tokens, spent_tokens) VALUES ('ep1', 'epic', 100, 95)")
    .execute(&pool)
    .await
    .unwrap();

  let mut nodes = HashMap::new();
  nodes.insert("T".to_string(), Node::new("T", ComponentType::TriggerChat));
  nodes.insert("A".to_string(), agent_node("A", "a", Some(20)));
  nodes.insert("B".to_string(), agent_node("B", "b", Some(20)));
  let workflow = Workflow {
    workflow_id: "wf-budget".to_string(),
    slug: "budget".to_string(),
    name: "budget".to_string(),
    nodes,
    edges: vec![Edge::direct("e-ta", "T", "A"), Edge::direct("e-ab", "A", "B")],
    deleted_at: None,
    error_handler_workflow_slug: None,
  };
  deps.store.create_workflow(&workflow).await.unwrap();

  let mut execution = pipelit_config::Execution::new("exec-s3", workflow.workflow_id.as_str(), "T", json!({"text": "hi"}), Utc::now());
  execution.epic_id = Some("ep1".to_string());
  deps.store.create_execution(&execution).await.unwrap();
  deps
    .dispatcher
    .enqueue(context::WORKFLOW_QUEUE, &execution.execution_id, json!({"execution_id": execution.execution_id}))
    .await;

  let status = run_one(&deps).await;
  assert_eq!(status, ExecutionStatus::Completed);

  let logs = deps.store.list_logs("exec-s3").await.unwrap();
  let a_log = logs.iter().find(|l| l.node_id == "A").unwrap();
  assert_eq!(a_log.status, "skipped");
  let b_log = logs.iter().find(|l| l.node_id == "B").unwrap();
  assert_eq!(b_log.status, "skipped");

  let epic = deps.store.get_epic("ep1").await.unwrap();
  assert_eq!(epic.spent_tokens, 95, "nothing was actually spent");
}

#[tokio::test]
async fn subworkflow_delegation_interrupts_then_resumes_the_parent() {
  let pool = pool().await;
  let (deps, _store) = harness(delegating_registry(), pool).await;

  let mut parent_nodes = HashMap::new();
  parent_nodes.insert("T".to_string(), Node::new("T", ComponentType::TriggerChat));
  parent_nodes.insert("P".to_string(), agent_node("P", "delegate", None));
  let parent = Workflow {
    workflow_id: "wf-parent".to_string(),
    slug: "parent".to_string(),
    name: "parent".to_string(),
    nodes: parent_nodes,
    edges: vec![Edge::direct("e-tp", "T", "P")],
    deleted_at: None,
    error_handler_workflow_slug: None,
  };
  deps.store.create_workflow(&parent).await.unwrap();

  let mut child_nodes = HashMap::new();
  child_nodes.insert("Tc".to_string(), Node::new("Tc", ComponentType::TriggerChat));
  child_nodes.insert("Ac".to_string(), agent_node("Ac", "done", None));
  let child = Workflow {
    workflow_id: "wf-child".to_string(),
    slug: "child".to_string(),
    name: "child".to_string(),
    nodes: child_nodes,
    edges: vec![Edge::direct("e-tcac", "Tc", "Ac")],
    deleted_at: None,
    error_handler_workflow_slug: None,
  };
  deps.store.create_workflow(&child).await.unwrap();

  let parent_execution_id = pipelit_orchestrator::enqueue_execution(&deps, "parent", None, json!({"text": "go"})).await.unwrap();
  let parent_status = run_one(&deps).await;
  assert_eq!(parent_status, ExecutionStatus::Interrupted);

  let child_status = run_one(&deps).await;
  assert_eq!(child_status, ExecutionStatus::Completed);

  let resume_job = deps.dispatcher.dequeue("resume").await;
  assert_eq!(resume_job.payload["parent_execution_id"], parent_execution_id.as_str());
  assert_eq!(resume_job.payload["parent_node_id"], "P");
  let node_id = resume_job.payload["parent_node_id"].as_str().unwrap().to_string();
  let child_result = resume_job.payload["child_result"].clone();

  let resumed_status = pipelit_orchestrator::resume(&deps, &parent_execution_id, &node_id, child_result).await.unwrap();
  assert_eq!(resumed_status, ExecutionStatus::Completed);

  let parent_execution = deps.store.get_execution(&parent_execution_id).await.unwrap();
  let final_output = parent_execution.final_output.unwrap();
  assert_eq!(final_output["P"]["output"], "done");

  let child_executions = deps.store.list_child_executions(&parent_execution_id).await.unwrap();
  assert_eq!(child_executions.len(), 1);
  assert_eq!(child_executions[0].parent_execution_id.as_deref(), Some(parent_execution_id.as_str()));
  assert_eq!(child_executions[0].parent_node_id.as_deref(), Some("P"));
}
