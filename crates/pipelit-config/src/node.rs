use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The discriminator for a node's behavior. Nodes are polymorphic only in
/// configuration, never in control flow — new behavior means a new
/// variant here plus a matching entry in the component registry, not a
/// new struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
  TriggerChat,
  TriggerWebhook,
  TriggerSchedule,
  Agent,
  Tool,
  Switch,
  Router,
  Loop,
  SubWorkflow,
  OutputParser,
}

impl ComponentType {
  /// Whether this component type requires a resolved `model_ref` at build
  /// time (an "AI-class" node).
  pub fn requires_model(self) -> bool {
    matches!(self, ComponentType::Agent)
  }

  /// Whether this component type may originate conditional edges.
  pub fn may_route(self) -> bool {
    matches!(self, ComponentType::Switch)
  }
}

/// Closed set of port types a component's inputs/outputs are declared
/// against. `Any` accepts everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortType {
  String,
  Number,
  Boolean,
  Object,
  Array,
  Messages,
  Any,
}

impl PortType {
  /// Port compatibility rule: `Any` accepts
  /// everything on either side, otherwise types must match exactly.
  pub fn compatible_with(self, other: PortType) -> bool {
    self == PortType::Any || other == PortType::Any || self == other
  }
}

/// A node as stored on a workflow: a stable id, a component type, and
/// free-form static configuration. Polymorphism lives entirely in
/// `extra_config`; the registry (see `pipelit-component`) is what gives
/// `component_type` its meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  pub component_type: ComponentType,
  #[serde(default)]
  pub system_prompt: Option<String>,
  #[serde(default)]
  pub extra_config: HashMap<String, serde_json::Value>,
  #[serde(default)]
  pub model_credential_id: Option<String>,
  #[serde(default)]
  pub canvas_x: f64,
  #[serde(default)]
  pub canvas_y: f64,
}

impl Node {
  pub fn new(node_id: impl Into<String>, component_type: ComponentType) -> Self {
    Self {
      node_id: node_id.into(),
      component_type,
      system_prompt: None,
      extra_config: HashMap::new(),
      model_credential_id: None,
      canvas_x: 0.0,
      canvas_y: 0.0,
    }
  }
}
