use std::collections::HashMap;

use serde_json::Value;

use pipelit_config::ComponentType;

/// A node as compiled into a plan: its static configuration plus the
/// sub-component wiring resolved from `llm`/`tool`/`output_parser` edges.
/// `system_prompt`/`extra_config` are still unresolved templates — the
/// resolver substitutes them per execution, against that execution's
/// state, not once at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNode {
  pub node_id: String,
  pub component_type: ComponentType,
  pub system_prompt: Option<String>,
  pub extra_config: HashMap<String, Value>,
  pub model_ref: Option<String>,
  pub tool_node_ids: Vec<String>,
  pub output_parser_node_id: Option<String>,
}

/// The branches a `switch` node routes to. `conditions` is evaluated in
/// order; the first whose `condition_value` matches the node's `_route`
/// output wins. `default_target` fires when none match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SwitchRoute {
  pub conditions: Vec<(String, String)>,
  pub default_target: Option<String>,
}

/// A compiled, trigger-scoped execution plan: the subset of a workflow
/// reachable from one trigger node, with dataflow adjacency pre-sorted and
/// sub-component/conditional wiring resolved. Immutable once built; the
/// orchestrator only ever reads from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
  pub workflow_id: String,
  pub trigger_node_id: String,
  pub nodes: HashMap<String, PlannedNode>,
  pub adjacency: HashMap<String, Vec<pipelit_config::Edge>>,
  pub switch_routes: HashMap<String, SwitchRoute>,
}

impl Plan {
  pub fn node(&self, node_id: &str) -> Option<&PlannedNode> {
    self.nodes.get(node_id)
  }

  pub fn outgoing(&self, node_id: &str) -> &[pipelit_config::Edge] {
    self.adjacency.get(node_id).map(|v| v.as_slice()).unwrap_or(&[])
  }

  pub fn switch_route(&self, node_id: &str) -> Option<&SwitchRoute> {
    self.switch_routes.get(node_id)
  }
}
