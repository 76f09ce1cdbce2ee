//! Ephemeral per-execution state.
//!
//! Modeled as an owned struct with a narrow writer interface: the
//! only way to mutate an `ExecutionState` is through the methods below,
//! each of which enforces one invariant by construction (stable
//! message ids, shallow `_state_patch` merge with protected keys
//! dropped, whole-map replacement of `node_outputs[node_id]`). The *live*
//! object is worker-local; `snapshot`/`restore` round-trip it through
//! `serde_json` for cross-worker resumption (sub-workflow checkpoints,
//! durable conversation memory — both consumers of the same shape).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single conversation message. Ids are assigned by whoever produces
/// the message (the component, or the orchestrator for the initial
/// trigger message); appending a message whose id already exists is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub id: String,
  pub role: String,
  pub content: Value,
}

/// The triggering input for an execution, re-exposed as a shorthand
/// (`trigger.text`, `trigger.payload`) in expression resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Trigger {
  pub text: String,
  pub payload: Value,
}

/// Outcome of one node's execution, as tracked in ephemeral state before
/// being flushed to an `ExecutionLog` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
  pub status: String,
  pub error: Option<String>,
  pub error_code: Option<pipelit_config::ErrorCode>,
  pub metadata: Value,
  pub duration_ms: u64,
}

/// Keys in `_state_patch` that are always dropped rather than merged —
/// mutating these out-of-band would break every other invariant here.
const PROTECTED_KEYS: [&str; 3] = ["messages", "node_outputs", "node_results"];

/// Per-execution ephemeral state, held in a fast key/value store (or, in
/// a single-process deployment, simply in memory) while an execution
/// runs. Garbage-collected with a TTL shortly after a terminal status is
/// recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
  pub execution_id: String,
  pub thread_id: Option<String>,
  pub parent_execution_id: Option<String>,
  pub parent_node_id: Option<String>,
  messages: Vec<Message>,
  node_outputs: HashMap<String, Map<String, Value>>,
  node_results: HashMap<String, NodeOutcome>,
  route: String,
  trigger: Trigger,
  user_context: Map<String, Value>,
}

impl ExecutionState {
  pub fn new(execution_id: impl Into<String>, trigger: Trigger) -> Self {
    Self {
      execution_id: execution_id.into(),
      thread_id: None,
      parent_execution_id: None,
      parent_node_id: None,
      messages: Vec::new(),
      node_outputs: HashMap::new(),
      node_results: HashMap::new(),
      route: String::new(),
      trigger,
      user_context: Map::new(),
    }
  }

  // --- writers -----------------------------------------------------

  /// Append a message. A duplicate id is a no-op.
  pub fn append_message(&mut self, message: Message) {
    if self.messages.iter().any(|m| m.id == message.id) {
      return;
    }
    self.messages.push(message);
  }

  pub fn append_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
    for m in messages {
      self.append_message(m);
    }
  }

  /// Set `state.route`, as a switch or a component emitting `_route` does.
  pub fn set_route(&mut self, route: impl Into<String>) {
    self.route = route.into();
  }

  /// Replace `node_outputs[node_id]` wholesale with the flat map a
  /// component returned, underscore keys already stripped by the caller
  /// (orchestrator output-convention handling) — stripped again here as
  /// a defense-in-depth invariant.
  pub fn set_node_output(&mut self, node_id: impl Into<String>, output: Map<String, Value>) {
    let filtered: Map<String, Value> = output
      .into_iter()
      .filter(|(k, _)| !k.starts_with('_'))
      .collect();
    self.node_outputs.insert(node_id.into(), filtered);
  }

  pub fn set_node_result(&mut self, node_id: impl Into<String>, outcome: NodeOutcome) {
    self.node_results.insert(node_id.into(), outcome);
  }

  /// Shallow-merge a `_state_patch` into top-level state. Protected keys
  /// are silently dropped.
  pub fn merge_state_patch(&mut self, patch: Map<String, Value>) {
    for (key, value) in patch {
      if PROTECTED_KEYS.contains(&key.as_str()) {
        continue;
      }
      self.user_context.insert(key, value);
    }
  }

  // --- readers -------------------------------------------------------

  pub fn messages(&self) -> &[Message] {
    &self.messages
  }

  pub fn node_outputs(&self) -> &HashMap<String, Map<String, Value>> {
    &self.node_outputs
  }

  pub fn node_results(&self) -> &HashMap<String, NodeOutcome> {
    &self.node_results
  }

  pub fn route(&self) -> &str {
    &self.route
  }

  pub fn trigger(&self) -> &Trigger {
    &self.trigger
  }

  pub fn user_context(&self) -> &Map<String, Value> {
    &self.user_context
  }

  /// Build the context map the Expression Resolver evaluates `{{ ... }}`
  /// against: one binding per node id (its `node_outputs` dict), plus
  /// `trigger`, plus every `user_context` key flattened at top level.
  pub fn resolver_context(&self) -> Value {
    let mut ctx = Map::new();
    for (node_id, output) in &self.node_outputs {
      ctx.insert(node_id.clone(), Value::Object(output.clone()));
    }
    ctx.insert(
      "trigger".to_string(),
      serde_json::json!({ "text": self.trigger.text, "payload": self.trigger.payload }),
    );
    for (k, v) in &self.user_context {
      ctx.insert(k.clone(), v.clone());
    }
    Value::Object(ctx)
  }

  /// Read-only view handed to a component about to execute.
  pub fn view(&self) -> StateView<'_> {
    StateView { state: self }
  }

  /// Clone of this state with `messages` replaced by a trimmed window.
  /// Used to build the `StateView` a component sees
  /// without mutating the canonical message history it was trimmed from.
  pub fn with_trimmed_messages(&self, trimmed: Vec<Message>) -> Self {
    let mut clone = self.clone();
    clone.messages = trimmed;
    clone
  }
}

/// Read-only view of `ExecutionState` exposed to a running component.
/// Components can observe but never
/// mutate state directly — all mutation happens through the orchestrator
/// applying the output convention after a component returns.
#[derive(Clone, Copy)]
pub struct StateView<'a> {
  state: &'a ExecutionState,
}

impl<'a> StateView<'a> {
  pub fn messages(&self) -> &'a [Message] {
    self.state.messages()
  }

  pub fn node_outputs(&self) -> &'a HashMap<String, Map<String, Value>> {
    self.state.node_outputs()
  }

  pub fn node_results(&self) -> &'a HashMap<String, NodeOutcome> {
    self.state.node_results()
  }

  pub fn trigger(&self) -> &'a Trigger {
    self.state.trigger()
  }

  pub fn user_context(&self) -> &'a Map<String, Value> {
    self.state.user_context()
  }

  pub fn route(&self) -> &'a str {
    self.state.route()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn fresh() -> ExecutionState {
    ExecutionState::new(
      "exec-1",
      Trigger {
        text: "hi".to_string(),
        payload: json!({}),
      },
    )
  }

  #[test]
  fn duplicate_message_id_is_noop() {
    let mut s = fresh();
    s.append_message(Message {
      id: "m1".to_string(),
      role: "user".to_string(),
      content: json!("a"),
    });
    s.append_message(Message {
      id: "m1".to_string(),
      role: "assistant".to_string(),
      content: json!("b"),
    });
    assert_eq!(s.messages().len(), 1);
    assert_eq!(s.messages()[0].role, "user");
  }

  #[test]
  fn state_patch_merge_is_shallow_and_drops_protected_keys() {
    let mut s = fresh();
    let mut patch = Map::new();
    patch.insert("foo".to_string(), json!({"nested": 1}));
    patch.insert("node_outputs".to_string(), json!({"x": 1}));
    s.merge_state_patch(patch);
    assert_eq!(s.user_context().get("foo"), Some(&json!({"nested": 1})));
    assert!(s.node_outputs().is_empty());
  }

  #[test]
  fn node_output_replaces_whole_map_and_strips_underscore_keys() {
    let mut s = fresh();
    let mut out = Map::new();
    out.insert("a".to_string(), json!(1));
    out.insert("_route".to_string(), json!("x"));
    s.set_node_output("n1", out);
    assert_eq!(s.node_outputs()["n1"].len(), 1);
    assert!(s.node_outputs()["n1"].contains_key("a"));
  }

  #[test]
  fn resolver_context_includes_node_trigger_and_user_context() {
    let mut s = fresh();
    let mut out = Map::new();
    out.insert("output".to_string(), json!("Echo: hi"));
    s.set_node_output("agent", out);
    let mut patch = Map::new();
    patch.insert("locale".to_string(), json!("en"));
    s.merge_state_patch(patch);

    let ctx = s.resolver_context();
    assert_eq!(ctx["agent"]["output"], json!("Echo: hi"));
    assert_eq!(ctx["trigger"]["text"], json!("hi"));
    assert_eq!(ctx["locale"], json!("en"));
  }
}
