//! Expression Resolver (C2).
//!
//! Substitutes every `{{ expr }}` in a configuration string against a
//! context map, tolerant of missing keys: a path that doesn't resolve
//! leaves the original `{{ ... }}` literal untouched rather than raising.
//! Built on `minijinja`: dotted path against an arbitrary JSON context
//! map, with a small filter pipeline, that never fails on its own.

use std::collections::HashMap;
use std::sync::OnceLock;

use minijinja::{Environment, UndefinedBehavior, Value as MjValue};
use regex::Regex;

fn expr_pattern() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("valid regex"))
}

/// Evaluates `{{ expr }}` substitutions against a JSON context map.
///
/// One `Resolver` can be reused across an entire execution; it holds no
/// per-call state.
pub struct Resolver {
  env: Environment<'static>,
}

impl Default for Resolver {
  fn default() -> Self {
    Self::new()
  }
}

impl Resolver {
  pub fn new() -> Self {
    let mut env = Environment::new();
    // Strict so a missing key surfaces as an error we can catch and turn
    // into "leave the literal alone", rather than minijinja's default of
    // silently rendering undefined as an empty string.
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    Self { env }
  }

  /// Resolve every `{{ expr }}` span in `template` against `context`.
  ///
  /// Non-string results are stringified for inline text; a `| tojson`
  /// filter at the end of an expression instead emits canonical JSON
  /// (minijinja's built-in `tojson` filter does this natively). A span
  /// whose path can't be resolved — or whose syntax is invalid — is left
  /// verbatim. This never returns an error for missing data; resolution
  /// is "best effort, always total."
  pub fn resolve_str(&self, template: &str, context: &serde_json::Value) -> String {
    if !template.contains("{{") {
      return template.to_string();
    }

    let ctx = MjValue::from_serialize(context);

    expr_pattern()
      .replace_all(template, |caps: &regex::Captures| {
        let whole = caps.get(0).unwrap().as_str();
        let expr = caps.get(1).unwrap().as_str();
        self
          .eval_expr(expr, &ctx)
          .unwrap_or_else(|| whole.to_string())
      })
      .into_owned()
  }

  fn eval_expr(&self, expr: &str, ctx: &MjValue) -> Option<String> {
    let compiled = self.env.compile_expression(expr).ok()?;
    let value = compiled.eval(ctx.clone()).ok()?;
    if value.is_undefined() {
      return None;
    }
    Some(value_to_inline_string(&value))
  }

  /// Resolve the `system_prompt` and every string-valued leaf of
  /// `extra_config`, recursing through nested objects/arrays.
  pub fn resolve_node_config(
    &self,
    system_prompt: Option<&str>,
    extra_config: &HashMap<String, serde_json::Value>,
    context: &serde_json::Value,
  ) -> (Option<String>, HashMap<String, serde_json::Value>) {
    let resolved_prompt = system_prompt.map(|s| self.resolve_str(s, context));
    let resolved_config = extra_config
      .iter()
      .map(|(k, v)| (k.clone(), self.resolve_value(v, context)))
      .collect();
    (resolved_prompt, resolved_config)
  }

  fn resolve_value(&self, value: &serde_json::Value, context: &serde_json::Value) -> serde_json::Value {
    match value {
      serde_json::Value::String(s) => serde_json::Value::String(self.resolve_str(s, context)),
      serde_json::Value::Array(items) => {
        serde_json::Value::Array(items.iter().map(|v| self.resolve_value(v, context)).collect())
      }
      serde_json::Value::Object(map) => serde_json::Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), self.resolve_value(v, context)))
          .collect(),
      ),
      other => other.clone(),
    }
  }
}

/// Stringify a resolved minijinja value for inline text substitution.
/// Values already produced by `| tojson` are strings and pass through
/// unchanged; everything else uses minijinja's `Display` so numbers/bools
/// render inline the same way a plain text template would.
fn value_to_inline_string(value: &MjValue) -> String {
  if let Some(s) = value.as_str() {
    s.to_string()
  } else {
    value.to_string()
  }
}

/// Resolution is idempotent: a string with no remaining `{{` is returned
/// unchanged. This holds structurally since
/// `resolve_str` is a no-op fast path whenever `"{{"` is absent.
#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn ctx() -> serde_json::Value {
    json!({
      "trigger": { "text": "hi", "payload": {"a": 1} },
      "agent_1": { "output": "Echo: hi" },
      "user_name": "Ada",
    })
  }

  #[test]
  fn resolves_simple_dotted_path() {
    let r = Resolver::new();
    assert_eq!(r.resolve_str("{{ trigger.text }}", &ctx()), "hi");
  }

  #[test]
  fn missing_path_preserves_literal() {
    let r = Resolver::new();
    let out = r.resolve_str("{{ nope.missing }}", &ctx());
    assert_eq!(out, "{{ nope.missing }}");
  }

  #[test]
  fn missing_path_mixed_with_resolved_text() {
    let r = Resolver::new();
    let out = r.resolve_str("hello {{ trigger.text }} and {{ nope }}", &ctx());
    assert_eq!(out, "hello hi and {{ nope }}");
  }

  #[test]
  fn filters_upper_lower_length() {
    let r = Resolver::new();
    assert_eq!(r.resolve_str("{{ user_name | upper }}", &ctx()), "ADA");
    assert_eq!(r.resolve_str("{{ user_name | lower }}", &ctx()), "ada");
    assert_eq!(r.resolve_str("{{ user_name | length }}", &ctx()), "3");
  }

  #[test]
  fn tojson_filter_emits_canonical_json() {
    let r = Resolver::new();
    let out = r.resolve_str("{{ trigger.payload | tojson }}", &ctx());
    assert_eq!(out, "{\"a\":1}");
  }

  #[test]
  fn non_string_values_are_stringified_inline() {
    let r = Resolver::new();
    let context = json!({ "count": 5, "ok": true });
    assert_eq!(r.resolve_str("n={{ count }} ok={{ ok }}", &context), "n=5 ok=true");
  }

  #[test]
  fn idempotent_when_no_template_remains() {
    let r = Resolver::new();
    let already_resolved = "hello hi and {{ nope }}";
    assert_eq!(r.resolve_str(already_resolved, &ctx()), already_resolved);
  }

  #[test]
  fn resolves_every_string_leaf_of_extra_config() {
    let r = Resolver::new();
    let mut extra = HashMap::new();
    extra.insert(
      "nested".to_string(),
      json!({ "greeting": "Hi {{ user_name }}", "list": ["{{ trigger.text }}", "literal"] }),
    );
    let (prompt, resolved) =
      r.resolve_node_config(Some("Echo: {{ trigger.text }}"), &extra, &ctx());
    assert_eq!(prompt.unwrap(), "Echo: hi");
    assert_eq!(resolved["nested"]["greeting"], json!("Hi Ada"));
    assert_eq!(resolved["nested"]["list"][0], json!("hi"));
  }
}
