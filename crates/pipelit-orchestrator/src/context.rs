use std::collections::HashMap;
use std::sync::Arc;

use pipelit_builder::Plan;
use pipelit_component::ComponentRegistry;
use pipelit_graph_cache::GraphCache;
use pipelit_queue::JobDispatcher;
use pipelit_resolver::Resolver;
use pipelit_store::{CheckpointStore, Store};

use crate::trim;

/// Queue name dispatcher jobs are enqueued under for both fresh firings
/// and sub-workflow resume re-enqueues. The scheduler (C7) enqueues onto
/// the same queue so a single pool of workers drains both.
pub const WORKFLOW_QUEUE: &str = "workflow";

/// Checkpoints survive at least an hour.
pub fn checkpoint_ttl() -> chrono::Duration {
  chrono::Duration::hours(1)
}

/// Durable conversation memory is kept much longer than a resumption
/// checkpoint; 30 days is a reasonable "recent enough to load" horizon
/// for a thread nobody has mutated.
pub fn thread_memory_ttl() -> chrono::Duration {
  chrono::Duration::days(30)
}

/// Every collaborator the orchestrator needs, bundled so `run`/`resume`
/// take one argument instead of six. Cheap to clone: every field is an
/// `Arc` or already clone-cheap (`ComponentRegistry`, `Resolver`).
#[derive(Clone)]
pub struct Deps {
  pub store: Arc<dyn Store>,
  pub checkpoints: Arc<dyn CheckpointStore>,
  pub registry: ComponentRegistry,
  pub plans: Arc<GraphCache<Plan>>,
  pub resolver: Arc<Resolver>,
  pub bus: Arc<pipelit_broadcast::Bus>,
  pub dispatcher: Arc<dyn JobDispatcher>,
  pub model_windows: Arc<HashMap<String, u64>>,
}

impl Deps {
  pub fn new(
    store: Arc<dyn Store>,
    checkpoints: Arc<dyn CheckpointStore>,
    registry: ComponentRegistry,
    plans: Arc<GraphCache<Plan>>,
    dispatcher: Arc<dyn JobDispatcher>,
    bus: Arc<pipelit_broadcast::Bus>,
  ) -> Self {
    Self {
      store,
      checkpoints,
      registry,
      plans,
      resolver: Arc::new(Resolver::new()),
      bus,
      dispatcher,
      model_windows: Arc::new(trim::default_model_windows()),
    }
  }
}

pub fn checkpoint_key(execution_id: &str, node_id: &str) -> String {
  format!("exec:{execution_id}:{node_id}")
}

pub fn thread_key(thread_id: &str) -> String {
  format!("thread:{thread_id}")
}

/// Pick the entry node for a workflow that has no explicit trigger node
/// specified: the lowest-id node of a trigger component type. Used both
/// for `enqueue_execution` with no `trigger_node_id` and for sub-workflow
/// delegation, which never names one explicitly.
pub fn default_trigger_node(workflow: &pipelit_config::Workflow) -> Option<String> {
  let mut ids: Vec<&String> = workflow
    .nodes
    .iter()
    .filter(|(_, node)| {
      matches!(
        node.component_type,
        pipelit_config::ComponentType::TriggerChat
          | pipelit_config::ComponentType::TriggerWebhook
          | pipelit_config::ComponentType::TriggerSchedule
      )
    })
    .map(|(id, _)| id)
    .collect();
  ids.sort();
  ids.into_iter().next().cloned()
}
