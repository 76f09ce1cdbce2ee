use serde::{Deserialize, Serialize};

/// The wire envelope every published event carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  #[serde(rename = "type")]
  pub event_type: String,
  pub channel: String,
  pub timestamp: f64,
  pub data: serde_json::Value,
}

impl Event {
  pub fn new(event_type: impl Into<String>, channel: impl Into<String>, data: serde_json::Value) -> Self {
    Self {
      event_type: event_type.into(),
      channel: channel.into(),
      timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
      data,
    }
  }
}

/// Channel-naming helpers.
pub fn workflow_channel(slug: &str) -> String {
  format!("workflow:{slug}")
}

pub fn execution_channel(execution_id: &str) -> String {
  format!("execution:{execution_id}")
}

pub fn epic_channel(epic_id: &str) -> String {
  format!("epic:{epic_id}")
}
