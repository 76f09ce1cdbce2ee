use serde::{Deserialize, Serialize};

/// Edge variety. Only `Conditional` edges may carry a `condition_value`
/// and only `switch` nodes may originate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
  Direct,
  Conditional,
}

/// The label on an edge. The empty label (`""`) is ordinary dataflow; the
/// three sub-component labels wire capabilities into a node rather than
/// participating in execution ordering; the loop
/// labels bypass port-type compatibility checks and are the only edges
/// topology ever traverses backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
  #[serde(rename = "")]
  None,
  Llm,
  Tool,
  OutputParser,
  LoopBody,
  LoopReturn,
}

impl EdgeLabel {
  /// Sub-component labels feed per-node configuration resolution at build
  /// time and are never traversed for execution ordering.
  pub fn is_subcomponent(self) -> bool {
    matches!(self, EdgeLabel::Llm | EdgeLabel::Tool | EdgeLabel::OutputParser)
  }

  /// Loop edges bypass port-type compatibility checks.
  pub fn is_loop_bypass(self) -> bool {
    matches!(self, EdgeLabel::LoopBody | EdgeLabel::LoopReturn)
  }

  pub fn bypasses_type_check(self) -> bool {
    self.is_subcomponent() || self.is_loop_bypass()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  pub edge_id: String,
  pub source_node_id: String,
  pub target_node_id: String,
  pub edge_type: EdgeType,
  #[serde(default)]
  pub edge_label: EdgeLabel,
  #[serde(default)]
  pub condition_value: Option<String>,
  #[serde(default)]
  pub priority: i64,
}

impl Default for EdgeLabel {
  fn default() -> Self {
    EdgeLabel::None
  }
}

impl Edge {
  pub fn direct(
    edge_id: impl Into<String>,
    source: impl Into<String>,
    target: impl Into<String>,
  ) -> Self {
    Self {
      edge_id: edge_id.into(),
      source_node_id: source.into(),
      target_node_id: target.into(),
      edge_type: EdgeType::Direct,
      edge_label: EdgeLabel::None,
      condition_value: None,
      priority: 0,
    }
  }
}
