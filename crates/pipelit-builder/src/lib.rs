//! Builder (C4).
//!
//! Compiles a stored `Workflow` plus a trigger node into a `Plan`: the
//! trigger-scoped subset of the graph, with dataflow adjacency pre-sorted
//! and sub-component wiring (`llm`/`tool`/`output_parser`) resolved onto
//! the nodes that consume it. Building is pure and fails closed — a bad
//! topology, a type mismatch, or a conditional edge off a non-switch node
//! aborts the whole build with `ValidationError` rather than producing a
//! partially-wired plan.

mod error;
mod plan;

pub use error::ValidationError;
pub use plan::{Plan, PlannedNode, SwitchRoute};

use std::collections::HashMap;

use pipelit_component::{ComponentRegistry, SubComponentKind};
use pipelit_config::{Edge, EdgeLabel, EdgeType, Workflow};

/// Compile `workflow` into a `Plan` scoped to `trigger_node_id`.
pub fn build(
  workflow: &Workflow,
  trigger_node_id: &str,
  registry: &ComponentRegistry,
) -> Result<Plan, ValidationError> {
  if workflow.get_node(trigger_node_id).is_none() {
    return Err(ValidationError::UnknownTriggerNode(trigger_node_id.to_string()));
  }

  let reach = pipelit_topology::reachable_from(&workflow.edges, trigger_node_id);

  let mut nodes: HashMap<String, PlannedNode> = HashMap::new();
  for node_id in &reach.reachable {
    let node = workflow
      .get_node(node_id)
      .ok_or_else(|| ValidationError::DanglingEdge(node_id.clone()))?;
    if registry.spec(node.component_type).is_none() {
      return Err(ValidationError::UnregisteredComponentType {
        node_id: node_id.clone(),
        component_type: node.component_type,
      });
    }
    nodes.insert(
      node_id.clone(),
      PlannedNode {
        node_id: node_id.clone(),
        component_type: node.component_type,
        system_prompt: node.system_prompt.clone(),
        extra_config: node.extra_config.clone(),
        model_ref: node.model_credential_id.clone(),
        tool_node_ids: Vec::new(),
        output_parser_node_id: None,
      },
    );
  }

  let mut switch_routes: HashMap<String, SwitchRoute> = HashMap::new();
  let mut dataflow_edges: Vec<Edge> = Vec::new();

  for edge in &reach.edges {
    if edge.edge_label.is_subcomponent() {
      let target = nodes
        .get_mut(&edge.target_node_id)
        .expect("topology only returns edges between reachable nodes");
      match edge.edge_label {
        EdgeLabel::Llm => target.model_ref = Some(edge.source_node_id.clone()),
        EdgeLabel::Tool => target.tool_node_ids.push(edge.source_node_id.clone()),
        EdgeLabel::OutputParser => target.output_parser_node_id = Some(edge.source_node_id.clone()),
        _ => unreachable!("is_subcomponent() only matches Llm|Tool|OutputParser"),
      }
      continue;
    }

    if edge.edge_type == EdgeType::Conditional {
      let source = &nodes[&edge.source_node_id];
      if !source.component_type.may_route() {
        return Err(ValidationError::ConditionalEdgeFromNonSwitch {
          edge_id: edge.edge_id.clone(),
          source_node_id: edge.source_node_id.clone(),
        });
      }
      let route = switch_routes.entry(edge.source_node_id.clone()).or_default();
      match &edge.condition_value {
        Some(value) => route.conditions.push((value.clone(), edge.target_node_id.clone())),
        None => route.default_target = Some(edge.target_node_id.clone()),
      }
    }

    dataflow_edges.push(edge.clone());
  }

  for edge in &dataflow_edges {
    if edge.edge_label.bypasses_type_check() {
      continue;
    }
    let source_spec = registry.spec(nodes[&edge.source_node_id].component_type).expect("checked above");
    let target_spec = registry.spec(nodes[&edge.target_node_id].component_type).expect("checked above");
    if source_spec.outputs.is_empty() || target_spec.inputs.is_empty() {
      continue;
    }
    let compatible = source_spec
      .outputs
      .iter()
      .any(|output| target_spec.inputs.iter().any(|input| output.port_type.compatible_with(input.port_type)));
    if !compatible {
      return Err(ValidationError::IncompatiblePorts {
        edge_id: edge.edge_id.clone(),
        source_node_id: edge.source_node_id.clone(),
        target_node_id: edge.target_node_id.clone(),
      });
    }
  }

  let mut adjacency: HashMap<String, Vec<Edge>> = HashMap::new();
  for edge in dataflow_edges {
    adjacency.entry(edge.source_node_id.clone()).or_default().push(edge);
  }
  for edges in adjacency.values_mut() {
    edges.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.edge_id.cmp(&b.edge_id)));
  }

  for node in nodes.values() {
    let spec = registry.spec(node.component_type).expect("checked above");
    if node.component_type.requires_model() && node.model_ref.is_none() {
      return Err(ValidationError::MissingModelRef(node.node_id.clone()));
    }
    for kind in &spec.required_subcomponents {
      let present = match kind {
        SubComponentKind::Model => node.model_ref.is_some(),
        SubComponentKind::Tools => !node.tool_node_ids.is_empty(),
        SubComponentKind::OutputParser => node.output_parser_node_id.is_some(),
      };
      if !present {
        return Err(ValidationError::MissingSubComponent {
          node_id: node.node_id.clone(),
          kind: *kind,
        });
      }
    }
  }

  Ok(Plan {
    workflow_id: workflow.workflow_id.clone(),
    trigger_node_id: trigger_node_id.to_string(),
    nodes,
    adjacency,
    switch_routes,
  })
}
