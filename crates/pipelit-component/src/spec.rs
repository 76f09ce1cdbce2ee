use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use pipelit_config::{ComponentType, PortType};

/// One declared input or output port on a component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
  pub name: String,
  pub port_type: PortType,
  #[serde(default)]
  pub required: bool,
}

/// The capabilities a node of this component type may have wired in via
/// sub-component edges (`llm`, `tool`, `output_parser`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubComponentKind {
  Model,
  Tools,
  OutputParser,
}

/// Static metadata the builder and orchestrator consult for every
/// component type: its port contract and which sub-component wiring it
/// requires or accepts. This lives in an immutable registry keyed by
/// `component_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeSpec {
  pub component_type: ComponentType,
  pub inputs: Vec<PortSpec>,
  pub outputs: Vec<PortSpec>,
  pub required_subcomponents: HashSet<SubComponentKind>,
}

impl NodeTypeSpec {
  pub fn new(component_type: ComponentType) -> Self {
    Self {
      component_type,
      inputs: Vec::new(),
      outputs: Vec::new(),
      required_subcomponents: HashSet::new(),
    }
  }

  pub fn with_input(mut self, name: impl Into<String>, port_type: PortType, required: bool) -> Self {
    self.inputs.push(PortSpec {
      name: name.into(),
      port_type,
      required,
    });
    self
  }

  pub fn with_output(mut self, name: impl Into<String>, port_type: PortType) -> Self {
    self.outputs.push(PortSpec {
      name: name.into(),
      port_type,
      required: false,
    });
    self
  }

  pub fn requires(mut self, kind: SubComponentKind) -> Self {
    self.required_subcomponents.insert(kind);
    self
  }
}
