use serde::{Deserialize, Serialize};

/// Machine-readable error kind, carried alongside every human-readable
/// error message that reaches an `ExecutionLog` row or a `node_status` /
/// `execution_failed` broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  Validation,
  ComponentError,
  Timeout,
  BudgetExceeded,
  Cancelled,
  CheckpointLost,
  UpstreamFailed,
}
