use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::Job;

#[derive(Debug, Clone)]
struct Entry {
  ready_at: Instant,
  seq: u64,
  job_id: String,
  payload: serde_json::Value,
}

impl PartialEq for Entry {
  fn eq(&self, other: &Self) -> bool {
    self.ready_at == other.ready_at && self.seq == other.seq
  }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for Entry {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    // Earliest ready_at first, then FIFO by insertion sequence.
    self.ready_at.cmp(&other.ready_at).then(self.seq.cmp(&other.seq))
  }
}

#[derive(Default)]
struct QueueState {
  heap: BinaryHeap<Reverse<Entry>>,
  pending_ids: HashSet<String>,
}

/// In-process delay-queue `JobDispatcher`. One `Notify` per dispatcher
/// wakes every blocked `dequeue` whenever any queue changes; each waiter
/// then re-checks its own queue, so wakeup cost is O(waiters) rather
/// than needing a per-queue condvar.
pub struct InMemoryDispatcher {
  queues: Mutex<HashMap<String, QueueState>>,
  seq: Mutex<u64>,
  notify: Notify,
}

impl Default for InMemoryDispatcher {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryDispatcher {
  pub fn new() -> Self {
    Self {
      queues: Mutex::new(HashMap::new()),
      seq: Mutex::new(0),
      notify: Notify::new(),
    }
  }

  fn next_seq(&self) -> u64 {
    let mut seq = self.seq.lock().expect("seq mutex poisoned");
    *seq += 1;
    *seq
  }

  fn push(&self, queue: &str, job_id: &str, payload: serde_json::Value, ready_at: Instant) {
    let mut queues = self.queues.lock().expect("queues mutex poisoned");
    let state = queues.entry(queue.to_string()).or_default();
    if !state.pending_ids.insert(job_id.to_string()) {
      // Already pending under this id: enqueue is idempotent.
      return;
    }
    let seq = self.next_seq();
    state.heap.push(Reverse(Entry {
      ready_at,
      seq,
      job_id: job_id.to_string(),
      payload,
    }));
    drop(queues);
    self.notify.notify_waiters();
  }
}

#[async_trait::async_trait]
impl crate::JobDispatcher for InMemoryDispatcher {
  async fn enqueue(&self, queue: &str, job_id: &str, payload: serde_json::Value) {
    self.push(queue, job_id, payload, Instant::now());
  }

  async fn enqueue_in(&self, queue: &str, job_id: &str, payload: serde_json::Value, delay: Duration) {
    self.push(queue, job_id, payload, Instant::now() + delay);
  }

  async fn dequeue(&self, queue: &str) -> Job {
    loop {
      let wait_until = {
        let mut queues = self.queues.lock().expect("queues mutex poisoned");
        let state = queues.entry(queue.to_string()).or_default();
        match state.heap.peek() {
          Some(Reverse(top)) if top.ready_at <= Instant::now() => {
            let Reverse(entry) = state.heap.pop().expect("just peeked");
            state.pending_ids.remove(&entry.job_id);
            return Job {
              job_id: entry.job_id,
              payload: entry.payload,
            };
          }
          Some(Reverse(top)) => Some(top.ready_at),
          None => None,
        }
      };

      match wait_until {
        Some(ready_at) => {
          tokio::select! {
            _ = tokio::time::sleep_until(ready_at) => {}
            _ = self.notify.notified() => {}
          }
        }
        None => self.notify.notified().await,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::JobDispatcher;

  #[tokio::test]
  async fn dequeues_in_fifo_order_for_same_readiness() {
    let dispatcher = InMemoryDispatcher::new();
    dispatcher.enqueue("q", "a", serde_json::json!(1)).await;
    dispatcher.enqueue("q", "b", serde_json::json!(2)).await;

    let first = dispatcher.dequeue("q").await;
    let second = dispatcher.dequeue("q").await;
    assert_eq!(first.job_id, "a");
    assert_eq!(second.job_id, "b");
  }

  #[tokio::test]
  async fn duplicate_job_id_while_pending_is_a_noop() {
    let dispatcher = InMemoryDispatcher::new();
    dispatcher.enqueue("q", "a", serde_json::json!(1)).await;
    dispatcher.enqueue("q", "a", serde_json::json!(2)).await;

    let job = dispatcher.dequeue("q").await;
    assert_eq!(job.payload, serde_json::json!(1));

    // Queue is now empty: the duplicate enqueue never added a second entry.
    dispatcher.enqueue("q", "a", serde_json::json!(3)).await;
    let job = dispatcher.dequeue("q").await;
    assert_eq!(job.payload, serde_json::json!(3));
  }

  #[tokio::test(start_paused = true)]
  async fn enqueue_in_delays_readiness() {
    let dispatcher = InMemoryDispatcher::new();
    dispatcher
      .enqueue_in("q", "a", serde_json::json!(1), Duration::from_secs(10))
      .await;

    let handle = tokio::spawn(async move { dispatcher.dequeue("q").await });
    tokio::time::advance(Duration::from_secs(11)).await;
    let job = handle.await.unwrap();
    assert_eq!(job.job_id, "a");
  }
}
