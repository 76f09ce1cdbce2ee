//! Component Output Convention: splits a component's
//! flat return map into the plain `node_outputs` entries and the
//! underscore-prefixed control keys the orchestrator acts on.

use serde_json::{Map, Value};

use pipelit_state::Message;

#[derive(Debug, Clone)]
pub struct SubworkflowRequest {
  pub workflow_slug: String,
  pub input_text: String,
  pub task_id: Option<String>,
  pub input_data: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
  pub tokens: u64,
  pub usd: f64,
}

/// The parsed result of applying the output convention to one component
/// return value.
#[derive(Debug, Clone, Default)]
pub struct ConventionOutcome {
  pub node_outputs: Map<String, Value>,
  pub route: Option<String>,
  pub messages: Vec<Message>,
  pub state_patch: Option<Map<String, Value>>,
  pub subworkflow: Option<SubworkflowRequest>,
  pub token_usage: Option<TokenUsage>,
  pub error: Option<String>,
}

pub fn apply_output_convention(raw: Map<String, Value>) -> ConventionOutcome {
  let mut outcome = ConventionOutcome::default();

  for (key, value) in raw {
    if !key.starts_with('_') {
      outcome.node_outputs.insert(key, value);
      continue;
    }
    match key.as_str() {
      "_route" => outcome.route = value.as_str().map(str::to_string),
      "_messages" => outcome.messages = parse_messages(&value),
      "_state_patch" => outcome.state_patch = value.as_object().cloned(),
      "_subworkflow" => outcome.subworkflow = parse_subworkflow(&value),
      "_token_usage" => outcome.token_usage = Some(parse_token_usage(&value)),
      "_error" => outcome.error = value.as_str().map(str::to_string).or(Some(value.to_string())),
      _ => {}
    }
  }

  outcome
}

fn parse_messages(value: &Value) -> Vec<Message> {
  let Some(items) = value.as_array() else {
    return Vec::new();
  };
  items
    .iter()
    .map(|item| {
      let id = item
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
      let role = item
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("assistant")
        .to_string();
      let content = item.get("content").cloned().unwrap_or(Value::Null);
      Message { id, role, content }
    })
    .collect()
}

fn parse_subworkflow(value: &Value) -> Option<SubworkflowRequest> {
  let workflow_slug = value.get("workflow_slug")?.as_str()?.to_string();
  let input_text = value
    .get("input_text")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();
  let task_id = value.get("task_id").and_then(Value::as_str).map(str::to_string);
  let input_data = value.get("input_data").cloned();
  Some(SubworkflowRequest {
    workflow_slug,
    input_text,
    task_id,
    input_data,
  })
}

fn parse_token_usage(value: &Value) -> TokenUsage {
  TokenUsage {
    tokens: value.get("tokens").and_then(Value::as_u64).unwrap_or(0),
    usd: value.get("usd").and_then(Value::as_f64).unwrap_or(0.0),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn map(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
  }

  #[test]
  fn plain_keys_go_to_node_outputs_underscore_keys_are_stripped() {
    let outcome = apply_output_convention(map(json!({"output": "hi", "_route": "y"})));
    assert_eq!(outcome.node_outputs.get("output"), Some(&json!("hi")));
    assert!(!outcome.node_outputs.contains_key("_route"));
    assert_eq!(outcome.route.as_deref(), Some("y"));
  }

  #[test]
  fn messages_without_id_get_a_generated_one() {
    let outcome = apply_output_convention(map(json!({
      "_messages": [{"role": "assistant", "content": "done"}]
    })));
    assert_eq!(outcome.messages.len(), 1);
    assert!(!outcome.messages[0].id.is_empty());
    assert_eq!(outcome.messages[0].role, "assistant");
  }

  #[test]
  fn state_patch_is_captured_as_a_map() {
    let outcome = apply_output_convention(map(json!({"_state_patch": {"locale": "en"}})));
    assert_eq!(outcome.state_patch.unwrap().get("locale"), Some(&json!("en")));
  }

  #[test]
  fn subworkflow_request_is_parsed() {
    let outcome = apply_output_convention(map(json!({
      "_subworkflow": {"workflow_slug": "child", "input_text": "go"}
    })));
    let req = outcome.subworkflow.unwrap();
    assert_eq!(req.workflow_slug, "child");
    assert_eq!(req.input_text, "go");
  }

  #[test]
  fn error_key_is_captured_regardless_of_other_keys() {
    let outcome = apply_output_convention(map(json!({"output": "partial", "_error": "boom"})));
    assert_eq!(outcome.error.as_deref(), Some("boom"));
  }

  #[test]
  fn token_usage_defaults_missing_fields_to_zero() {
    let outcome = apply_output_convention(map(json!({"_token_usage": {"tokens": 42}})));
    let usage = outcome.token_usage.unwrap();
    assert_eq!(usage.tokens, 42);
    assert_eq!(usage.usd, 0.0);
  }
}
