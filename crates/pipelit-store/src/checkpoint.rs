use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A keyed, TTL'd blob. Unifies what would otherwise be two separate
/// checkpointer mechanisms: the sub-workflow resumption checkpoint
/// (`exec:{execution_id}:{node_id}`, TTL >= 1h) and
/// the durable conversation-memory snapshot (`thread:{thread_id}`, no
/// fixed TTL requirement beyond "recent enough to load"). Both are just a
/// caller-supplied key, a JSON blob, and an expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
  pub key: String,
  pub blob: serde_json::Value,
  pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
  async fn put(&self, key: &str, blob: serde_json::Value, expires_at: DateTime<Utc>) -> Result<(), Error>;

  /// `None` if the key was never written, already expired, or has been
  /// swept — the caller (sub-workflow resume) turns that into
  /// `ErrorCode::CheckpointLost`.
  async fn get(&self, key: &str) -> Result<Option<Checkpoint>, Error>;

  async fn delete(&self, key: &str) -> Result<(), Error>;
}
