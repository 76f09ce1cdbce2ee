use std::collections::HashSet;
use std::time::{Duration, Instant};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close codes the streaming endpoint uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
  Normal = 1000,
  AuthFailure = 1008,
}

/// One client's subscription set and ping/pong bookkeeping. Transport-agnostic: this
/// type knows nothing about the concrete socket, only the protocol state
/// machine a caller drives from whatever duplex byte stream it has.
pub struct StreamSession {
  subscriptions: HashSet<String>,
  last_outbound: Instant,
  awaiting_pong_since: Option<Instant>,
}

impl StreamSession {
  pub fn new() -> Self {
    Self {
      subscriptions: HashSet::new(),
      last_outbound: Instant::now(),
      awaiting_pong_since: None,
    }
  }

  /// `{type:"subscribe", channel}` → server replies `{type:"subscribed", channel}`.
  pub fn subscribe(&mut self, channel: impl Into<String>) -> String {
    let channel = channel.into();
    self.subscriptions.insert(channel.clone());
    channel
  }

  pub fn unsubscribe(&mut self, channel: &str) {
    self.subscriptions.remove(channel);
  }

  pub fn is_subscribed(&self, channel: &str) -> bool {
    self.subscriptions.contains(channel)
  }

  pub fn subscriptions(&self) -> &HashSet<String> {
    &self.subscriptions
  }

  /// Reconnect: a fresh session re-issues every channel the prior one had
  /// subscribed to. The caller constructs a
  /// new `StreamSession` and calls `subscribe` for each of these.
  pub fn channels_to_resubscribe(&self) -> Vec<String> {
    self.subscriptions.iter().cloned().collect()
  }

  /// Call whenever any message (ping included) is sent to the client.
  pub fn record_outbound(&mut self, now: Instant) {
    self.last_outbound = now;
  }

  /// True once 30s have passed with no outbound traffic — time to send a
  /// `{type:"ping"}`.
  pub fn should_ping(&self, now: Instant) -> bool {
    self.awaiting_pong_since.is_none() && now.duration_since(self.last_outbound) >= PING_INTERVAL
  }

  /// Call right after sending a ping.
  pub fn record_ping_sent(&mut self, now: Instant) {
    self.awaiting_pong_since = Some(now);
    self.record_outbound(now);
  }

  /// Call on receiving `{type:"pong"}`.
  pub fn record_pong(&mut self) {
    self.awaiting_pong_since = None;
  }

  /// True once a ping has gone 10s without a matching pong — the caller
  /// must disconnect.
  pub fn pong_overdue(&self, now: Instant) -> bool {
    self
      .awaiting_pong_since
      .is_some_and(|since| now.duration_since(since) >= PONG_TIMEOUT)
  }
}

impl Default for StreamSession {
  fn default() -> Self {
    Self::new()
  }
}
