use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::node::Node;

/// A stored workflow: the nodes and edges a `Builder` compiles into a
/// `Plan`. Deleting a workflow deletes its nodes and edges (ownership is
/// exclusive, enforced by the store, not by this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  pub slug: String,
  pub name: String,
  #[serde(default)]
  pub nodes: HashMap<String, Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
  #[serde(default)]
  pub deleted_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub error_handler_workflow_slug: Option<String>,
}

impl Workflow {
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  pub fn is_deleted(&self) -> bool {
    self.deleted_at.is_some()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Interrupted,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }
}

/// A single firing of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
  pub execution_id: String,
  pub workflow_id: String,
  pub trigger_node_id: String,
  pub status: ExecutionStatus,
  #[serde(default)]
  pub parent_execution_id: Option<String>,
  #[serde(default)]
  pub parent_node_id: Option<String>,
  #[serde(default)]
  pub thread_id: Option<String>,
  #[serde(default)]
  pub epic_id: Option<String>,
  #[serde(default)]
  pub task_id: Option<String>,
  pub trigger_payload: serde_json::Value,
  #[serde(default)]
  pub final_output: Option<serde_json::Value>,
  #[serde(default)]
  pub spent_tokens: u64,
  #[serde(default)]
  pub spent_usd: f64,
  pub started_at: DateTime<Utc>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
  pub fn new(
    execution_id: impl Into<String>,
    workflow_id: impl Into<String>,
    trigger_node_id: impl Into<String>,
    trigger_payload: serde_json::Value,
    started_at: DateTime<Utc>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id: workflow_id.into(),
      trigger_node_id: trigger_node_id.into(),
      status: ExecutionStatus::Pending,
      parent_execution_id: None,
      parent_node_id: None,
      thread_id: None,
      epic_id: None,
      task_id: None,
      trigger_payload,
      final_output: None,
      spent_tokens: 0,
      spent_usd: 0.0,
      started_at,
      completed_at: None,
    }
  }
}

/// Append-only per-node record of one node's execution within one
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
  pub execution_id: String,
  pub node_id: String,
  pub status: String,
  pub input: serde_json::Value,
  #[serde(default)]
  pub output: Option<serde_json::Value>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub error_code: Option<crate::ErrorCode>,
  #[serde(default)]
  pub metadata: serde_json::Value,
  pub duration_ms: u64,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobStatus {
  Active,
  Paused,
  Done,
  Dead,
}

/// A recurring job: fire `trigger_node_id` on `workflow_id` every
/// `interval_seconds`, retrying with capped exponential backoff on
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
  pub job_id: String,
  pub workflow_id: String,
  pub trigger_node_id: String,
  pub interval_seconds: u64,
  /// 0 means unlimited.
  #[serde(default)]
  pub total_repeats: u64,
  pub max_retries: u32,
  pub timeout_seconds: u64,
  #[serde(default)]
  pub trigger_payload: Option<serde_json::Value>,
  pub status: ScheduledJobStatus,
  #[serde(default)]
  pub current_repeat: u64,
  #[serde(default)]
  pub current_retry: u32,
  #[serde(default)]
  pub last_run_at: Option<DateTime<Utc>>,
  pub next_run_at: DateTime<Utc>,
  #[serde(default)]
  pub run_count: u64,
  #[serde(default)]
  pub error_count: u64,
  #[serde(default)]
  pub last_error: Option<String>,
}

/// Budget-gate container consulted by the orchestrator. Its
/// `spent_tokens` always equals `sum(task.actual_tokens)` over linked
/// tasks, maintained by the store under a per-epic lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
  pub epic_id: String,
  pub title: String,
  #[serde(default)]
  pub budget_tokens: Option<u64>,
  #[serde(default)]
  pub budget_usd: Option<f64>,
  #[serde(default)]
  pub spent_tokens: u64,
  #[serde(default)]
  pub spent_usd: f64,
  #[serde(default)]
  pub total_tasks: u64,
  #[serde(default)]
  pub completed_tasks: u64,
  #[serde(default)]
  pub failed_tasks: u64,
}

impl Epic {
  /// Would running a node with this many estimated tokens exceed the
  /// linked budget gate.
  pub fn would_exceed(&self, estimated_tokens: u64) -> bool {
    if let Some(budget_tokens) = self.budget_tokens {
      if self.spent_tokens + estimated_tokens > budget_tokens {
        return true;
      }
    }
    if let Some(budget_usd) = self.budget_usd {
      if self.spent_usd > budget_usd {
        return true;
      }
    }
    false
  }
}
