//! Context trimming. Applied just before any component
//! whose `NodeTypeSpec` declares a `MESSAGES` input. Uses `tiktoken-rs`'s
//! `cl100k_base` encoder — deterministic and round-trip-safe, which is all
//! a fixed BPE-style encoder needs to be.

use std::collections::HashMap;

use pipelit_state::Message;

pub const DEFAULT_OUTPUT_RESERVE: u64 = 4_096;
pub const DEFAULT_CONTEXT_WINDOW: u64 = 8_192;

/// Per-model context window lookup (`extra_config.context_window` always
/// overrides it). A handful of well-known models keep the table useful
/// without this crate needing to track every provider's catalog.
pub fn default_model_windows() -> HashMap<String, u64> {
  HashMap::from([
    ("gpt-4".to_string(), 8_192),
    ("gpt-4-turbo".to_string(), 128_000),
    ("gpt-4o".to_string(), 128_000),
    ("gpt-3.5-turbo".to_string(), 16_385),
    ("claude-3-opus".to_string(), 200_000),
    ("claude-3-sonnet".to_string(), 200_000),
  ])
}

pub fn context_window_for(model_ref: Option<&str>, override_window: Option<u64>, table: &HashMap<String, u64>) -> u64 {
  if let Some(window) = override_window {
    return window;
  }
  model_ref.and_then(|m| table.get(m).copied()).unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

fn message_text(message: &Message) -> String {
  match &message.content {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn count_tokens(bpe: &tiktoken_rs::CoreBPE, text: &str) -> u64 {
  bpe.encode_with_special_tokens(text).len() as u64
}

/// Drop oldest non-system messages until the remainder fits
/// `window - reserve - system_prompt_tokens`. System messages are always
/// retained regardless of budget.
pub fn trim_messages(messages: &[Message], system_prompt: Option<&str>, window: u64, reserve: u64) -> Vec<Message> {
  let bpe = tiktoken_rs::cl100k_base().expect("cl100k_base tokenizer ranks are bundled with tiktoken-rs");
  let system_tokens = system_prompt.map(|s| count_tokens(&bpe, s)).unwrap_or(0);
  let budget = window.saturating_sub(reserve).saturating_sub(system_tokens);

  let mut system_messages = Vec::new();
  let mut rest = Vec::new();
  for message in messages {
    if message.role == "system" {
      system_messages.push(message.clone());
    } else {
      rest.push((message, count_tokens(&bpe, &message_text(message))));
    }
  }

  let mut kept = Vec::new();
  let mut total = 0u64;
  for (message, tokens) in rest.iter().rev() {
    if total + tokens > budget {
      break;
    }
    total += tokens;
    kept.push((*message).clone());
  }
  kept.reverse();

  system_messages.extend(kept);
  system_messages
}

#[cfg(test)]
mod tests {
  use super::*;

  fn msg(id: &str, role: &str, content: &str) -> Message {
    Message {
      id: id.to_string(),
      role: role.to_string(),
      content: serde_json::Value::String(content.to_string()),
    }
  }

  #[test]
  fn fits_entirely_within_budget_keeps_everything() {
    let messages = vec![msg("1", "user", "hi"), msg("2", "assistant", "hello")];
    let trimmed = trim_messages(&messages, None, DEFAULT_CONTEXT_WINDOW, DEFAULT_OUTPUT_RESERVE);
    assert_eq!(trimmed.len(), 2);
  }

  #[test]
  fn drops_oldest_non_system_messages_first() {
    let long = "word ".repeat(2_000);
    let messages = vec![
      msg("1", "user", &long),
      msg("2", "user", &long),
      msg("3", "user", "most recent"),
    ];
    // Small budget: window=reserve+a few hundred tokens.
    let trimmed = trim_messages(&messages, None, DEFAULT_OUTPUT_RESERVE + 50, DEFAULT_OUTPUT_RESERVE);
    assert_eq!(trimmed.last().unwrap().id, "3");
    assert!(trimmed.len() < 3);
  }

  #[test]
  fn system_messages_are_always_retained() {
    let long = "word ".repeat(5_000);
    let messages = vec![msg("sys", "system", "you are a bot"), msg("1", "user", &long)];
    let trimmed = trim_messages(&messages, None, DEFAULT_OUTPUT_RESERVE + 10, DEFAULT_OUTPUT_RESERVE);
    assert!(trimmed.iter().any(|m| m.id == "sys"));
  }

  #[test]
  fn context_window_override_wins_over_table() {
    let table = default_model_windows();
    assert_eq!(context_window_for(Some("gpt-4"), Some(1_234), &table), 1_234);
    assert_eq!(context_window_for(Some("gpt-4"), None, &table), 8_192);
    assert_eq!(context_window_for(Some("unknown-model"), None, &table), DEFAULT_CONTEXT_WINDOW);
  }
}
