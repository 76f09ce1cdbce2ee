use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::Event;

const SUBSCRIBER_BUFFER: usize = 256;
const DEFAULT_EVICT_AFTER: Duration = Duration::from_secs(1);

struct Subscriber {
  id: u64,
  tx: mpsc::Sender<Event>,
  stalled_since: Option<Instant>,
}

/// Process-wide topic bus. `publish` never blocks on a slow subscriber: a
/// full send buffer starts that subscriber's stall clock, and once it has
/// been stalled longer than `evict_after` it is dropped rather than
/// allowed to apply backpressure to the publisher: bounded channel plus
/// eviction instead of an unbounded one.
///
/// Across process replicas the same channel names would be fanned out
/// over the underlying pub/sub bus; that transport is out
/// of scope here, this `Bus` is the single-process core it would sit atop.
pub struct Bus {
  channels: Mutex<HashMap<String, Vec<Subscriber>>>,
  next_id: AtomicU64,
  evict_after: Duration,
}

impl Default for Bus {
  fn default() -> Self {
    Self::new()
  }
}

impl Bus {
  pub fn new() -> Self {
    Self::with_evict_after(DEFAULT_EVICT_AFTER)
  }

  pub fn with_evict_after(evict_after: Duration) -> Self {
    Self {
      channels: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(1),
      evict_after,
    }
  }

  /// Subscribe to `channel`; events published after this call (and only
  /// after) arrive on the returned receiver, in publish order.
  pub fn subscribe(&self, channel: &str) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut channels = self.channels.lock().expect("bus mutex poisoned");
    channels
      .entry(channel.to_string())
      .or_default()
      .push(Subscriber { id, tx, stalled_since: None });
    rx
  }

  /// Number of live subscribers on `channel`. Exposed mainly for tests;
  /// real callers observe eviction only indirectly (their receiver ends).
  pub fn subscriber_count(&self, channel: &str) -> usize {
    self
      .channels
      .lock()
      .expect("bus mutex poisoned")
      .get(channel)
      .map(|v| v.len())
      .unwrap_or(0)
  }

  /// Publish `event` to every current subscriber of its channel.
  /// Non-blocking: uses `try_send`, never `.await`s on a subscriber.
  pub fn publish(&self, event: Event) {
    let mut channels = self.channels.lock().expect("bus mutex poisoned");
    let Some(subscribers) = channels.get_mut(&event.channel) else {
      return;
    };

    let now = Instant::now();
    subscribers.retain_mut(|sub| match sub.tx.try_send(event.clone()) {
      Ok(()) => {
        sub.stalled_since = None;
        true
      }
      Err(mpsc::error::TrySendError::Full(_)) => {
        let since = *sub.stalled_since.get_or_insert(now);
        if now.duration_since(since) > self.evict_after {
          debug!(channel = %event.channel, subscriber = sub.id, "evicting slow broadcast subscriber");
          false
        } else {
          true
        }
      }
      Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn subscriber_receives_published_events_in_order() {
    let bus = Bus::new();
    let mut rx = bus.subscribe("workflow:w1");
    bus.publish(Event::new("node_status", "workflow:w1", serde_json::json!({"n": 1})));
    bus.publish(Event::new("node_status", "workflow:w1", serde_json::json!({"n": 2})));

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.data["n"], 1);
    assert_eq!(second.data["n"], 2);
  }

  #[tokio::test]
  async fn events_before_subscribe_are_not_replayed() {
    let bus = Bus::new();
    bus.publish(Event::new("node_status", "workflow:w1", serde_json::json!({"n": 1})));
    let mut rx = bus.subscribe("workflow:w1");
    bus.publish(Event::new("node_status", "workflow:w1", serde_json::json!({"n": 2})));

    let only = rx.recv().await.unwrap();
    assert_eq!(only.data["n"], 2);
  }

  #[tokio::test]
  async fn other_channels_are_unaffected() {
    let bus = Bus::new();
    let mut rx = bus.subscribe("workflow:w1");
    bus.publish(Event::new("node_status", "workflow:other", serde_json::json!({})));
    // Give any (incorrect) delivery a chance to land before asserting absence.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn slow_subscriber_is_evicted_without_blocking_publisher() {
    let bus = Bus::with_evict_after(Duration::from_millis(10));
    let rx = bus.subscribe("c");
    // Fill the bounded buffer without ever reading it.
    for i in 0..(SUBSCRIBER_BUFFER + 5) {
      bus.publish(Event::new("t", "c", serde_json::json!(i)));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.publish(Event::new("t", "c", serde_json::json!("after-evict")));
    assert_eq!(bus.subscriber_count("c"), 0);
    drop(rx);
  }
}
