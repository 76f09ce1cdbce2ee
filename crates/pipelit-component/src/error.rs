use thiserror::Error;

use pipelit_config::ErrorCode;

/// A component raised an exception (as opposed to returning `_error` in
/// its output map, which the orchestrator treats identically but without
/// needing a Rust-level `Err`).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ComponentError {
  pub message: String,
  pub code: ErrorCode,
}

impl ComponentError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      code: ErrorCode::ComponentError,
    }
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      code: ErrorCode::Timeout,
    }
  }
}
