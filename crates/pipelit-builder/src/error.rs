use thiserror::Error;

use pipelit_config::ErrorCode;

/// Why a workflow could not be compiled into a `Plan`. All variants carry
/// `ErrorCode::Validation` — a build failure is always a
/// workflow authoring problem, never a runtime one.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("trigger node '{0}' is not present on the workflow")]
  UnknownTriggerNode(String),

  #[error("edge references node '{0}' which is not present on the workflow")]
  DanglingEdge(String),

  #[error("node '{node_id}' has component type '{component_type:?}' with no registered spec")]
  UnregisteredComponentType {
    node_id: String,
    component_type: pipelit_config::ComponentType,
  },

  #[error("edge '{edge_id}' is conditional but source node '{source_node_id}' is not a switch")]
  ConditionalEdgeFromNonSwitch { edge_id: String, source_node_id: String },

  #[error("edge '{edge_id}' connects incompatible ports between '{source_node_id}' and '{target_node_id}'")]
  IncompatiblePorts {
    edge_id: String,
    source_node_id: String,
    target_node_id: String,
  },

  #[error("node '{0}' requires a resolved model but has none wired in")]
  MissingModelRef(String),

  #[error("node '{node_id}' requires a {kind:?} sub-component but has none wired in")]
  MissingSubComponent {
    node_id: String,
    kind: pipelit_component::SubComponentKind,
  },
}

impl ValidationError {
  pub fn code(&self) -> ErrorCode {
    ErrorCode::Validation
  }
}
