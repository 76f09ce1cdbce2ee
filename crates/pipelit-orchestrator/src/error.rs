use thiserror::Error;

use pipelit_config::ErrorCode;

/// Failures the orchestrator itself can raise, as opposed to a component
/// failure (which is recorded as a `failed` node, not an `Err` here).
#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error("workflow build failed: {0}")]
  Build(#[from] pipelit_builder::ValidationError),

  #[error(transparent)]
  Store(#[from] pipelit_store::Error),

  #[error("execution {0} has no designated trigger node")]
  NoTriggerNode(String),

  #[error("resumption checkpoint lost for execution {execution_id} node {node_id}")]
  CheckpointLost { execution_id: String, node_id: String },
}

impl OrchestratorError {
  pub fn code(&self) -> ErrorCode {
    match self {
      OrchestratorError::Build(_) => ErrorCode::Validation,
      OrchestratorError::Store(_) => ErrorCode::ComponentError,
      OrchestratorError::NoTriggerNode(_) => ErrorCode::Validation,
      OrchestratorError::CheckpointLost { .. } => ErrorCode::CheckpointLost,
    }
  }
}
