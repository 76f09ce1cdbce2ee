use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use pipelit_state::StateView;

use crate::error::ComponentError;

/// A node's configuration after template resolution — `resolved_config`
/// is the `system_prompt`/`extra_config` a component actually runs with,
/// every `{{ ... }}` span substituted by the Expression Resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
  pub system_prompt: Option<String>,
  pub extra_config: HashMap<String, Value>,
}

/// A component is pure from the engine's perspective: `(resolved_config,
/// state_view) -> output_map`, or an error. The engine makes no
/// assumption about blocking vs async I/O inside — that's the
/// component's concern. Implementations of this trait are the agents,
/// tools, triggers, and routers a workflow graph is built from; none of
/// their bodies are in scope here, only the contract.
#[async_trait]
pub trait Component: Send + Sync {
  async fn execute(
    &self,
    config: &ResolvedConfig,
    state: StateView<'_>,
  ) -> Result<Map<String, Value>, ComponentError>;

  /// Continue a node that previously returned `_subworkflow`. `state` is the restored snapshot from the checkpoint —
  /// the component sees the same messages and outputs it left behind,
  /// plus `child_result`, the delegated execution's outcome. Components
  /// that never emit `_subworkflow` can leave the default, which fails
  /// any resume attempt.
  async fn resume(
    &self,
    _config: &ResolvedConfig,
    _state: StateView<'_>,
    _child_result: Value,
  ) -> Result<Map<String, Value>, ComponentError> {
    Err(ComponentError::new("component does not support sub-workflow resume"))
  }
}
