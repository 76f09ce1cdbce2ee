//! Job Dispatcher port (C8).
//!
//! An abstract queue boundary with a small, deliberately thin contract:
//! enqueue, enqueue-after-delay, dequeue, per-queue FIFO on the same
//! priority, at-least-once delivery. This crate defines that
//! contract as the `JobDispatcher` trait and supplies `InMemoryDispatcher`,
//! a delay-queue reference implementation suitable for tests and
//! single-process deployments. The concrete queue engine is out of scope,
//! but a workspace with no implementation at all can't be driven end to end.

mod memory;

pub use memory::InMemoryDispatcher;

use async_trait::async_trait;
use std::time::Duration;

/// One unit of work pulled off a queue: the id it was enqueued under, and
/// its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
  pub job_id: String,
  pub payload: serde_json::Value,
}

#[async_trait]
pub trait JobDispatcher: Send + Sync {
  /// Enqueue for immediate dequeue. Idempotent on `job_id`: enqueuing the
  /// same `(queue, job_id)` twice while the first is still pending is a
  /// no-op, not a duplicate entry.
  async fn enqueue(&self, queue: &str, job_id: &str, payload: serde_json::Value);

  /// Enqueue to become dequeuable after `delay`. Same idempotency as
  /// `enqueue`.
  async fn enqueue_in(&self, queue: &str, job_id: &str, payload: serde_json::Value, delay: Duration);

  /// Block until a job is ready on `queue`, honoring per-queue FIFO among
  /// jobs that became ready at the same time. At-least-once: a worker may
  /// crash after dequeue and before completing the work; callers must
  /// treat every delivery as possibly repeated.
  async fn dequeue(&self, queue: &str) -> Job;
}
