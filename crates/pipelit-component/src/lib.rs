//! Component execution contract.
//!
//! A component is a function `(resolved_config, state_view) -> output_map`.
//! This crate defines that contract as the `Component` trait, the
//! closed-set `NodeTypeSpec` metadata every component type declares, and a
//! construct-then-freeze `ComponentRegistry` keyed by `ComponentType` — an
//! immutable, read-mostly structure in place of a polymorphic,
//! inheritance-based configuration table.

mod component;
mod error;
mod registry;
mod spec;

pub use component::{Component, ResolvedConfig};
pub use error::ComponentError;
pub use registry::{ComponentRegistry, ComponentRegistryBuilder};
pub use spec::{NodeTypeSpec, PortSpec, SubComponentKind};

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use pipelit_config::{ComponentType, PortType};
  use pipelit_state::{ExecutionState, StateView, Trigger};
  use serde_json::{Map, json};

  struct EchoComponent;

  #[async_trait]
  impl Component for EchoComponent {
    async fn execute(
      &self,
      config: &ResolvedConfig,
      _state: StateView<'_>,
    ) -> Result<Map<String, serde_json::Value>, ComponentError> {
      let mut out = Map::new();
      out.insert(
        "output".to_string(),
        json!(config.system_prompt.clone().unwrap_or_default()),
      );
      Ok(out)
    }
  }

  #[tokio::test]
  async fn registry_round_trips_spec_and_component() {
    let spec = NodeTypeSpec::new(ComponentType::Agent)
      .with_input("system_prompt", PortType::String, true)
      .with_output("output", PortType::String)
      .requires(SubComponentKind::Model);

    let registry = ComponentRegistry::builder()
      .register(spec.clone(), EchoComponent)
      .build();

    assert_eq!(registry.spec(ComponentType::Agent), Some(&spec));
    assert!(registry.contains(ComponentType::Agent));
    assert!(!registry.contains(ComponentType::Tool));

    let component = registry.component(ComponentType::Agent).unwrap();
    let config = ResolvedConfig {
      system_prompt: Some("Echo: hi".to_string()),
      extra_config: Default::default(),
    };
    let state = ExecutionState::new(
      "exec-1",
      Trigger {
        text: "hi".to_string(),
        payload: json!({}),
      },
    );
    let out = component.execute(&config, state.view()).await.unwrap();
    assert_eq!(out["output"], json!("Echo: hi"));
  }
}
