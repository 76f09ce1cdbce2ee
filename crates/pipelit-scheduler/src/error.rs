use thiserror::Error;

use pipelit_config::ErrorCode;

/// Failures the scheduler itself can raise, distinct from a dispatcher
/// job simply observing the fired workflow fail or time out — those are
/// recorded as a retry, not an `Err` here.
#[derive(Debug, Error)]
pub enum SchedulerError {
  #[error(transparent)]
  Store(#[from] pipelit_store::Error),

  #[error("scheduled job {0} has no next_run_at it could be recovered from")]
  MissingNextRun(String),

  #[error("execution {0} did not reach a terminal status within the job's timeout")]
  Timeout(String),
}

impl SchedulerError {
  pub fn code(&self) -> ErrorCode {
    match self {
      SchedulerError::Store(_) => ErrorCode::ComponentError,
      SchedulerError::MissingNextRun(_) => ErrorCode::Validation,
      SchedulerError::Timeout(_) => ErrorCode::Timeout,
    }
  }
}
