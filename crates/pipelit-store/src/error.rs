use thiserror::Error;

/// Storage failure: splits "not found" from "the database said no" and adds
/// `Conflict` for the status-CAS path, since that one is
/// an expected, non-exceptional outcome rather than a database error.
#[derive(Debug, Error)]
pub enum Error {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
