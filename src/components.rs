//! A minimal, in-process component registry.
//!
//! Component bodies — the actual agents, tools, and routers a workflow
//! author wires together — are out of scope for this engine: it only
//! defines the `Component` trait boundary and drives whatever implements
//! it. These are reference/demo implementations in the same spirit as
//! `InMemoryDispatcher`: a registry with nothing registered in it can't
//! run a workflow end to end, so the binary ships one real component per
//! type, each as dumb as it can be while still exercising the port it
//! occupies.

use async_trait::async_trait;
use serde_json::{Map, Value};

use pipelit_component::{Component, ComponentError, ComponentRegistry, NodeTypeSpec, ResolvedConfig, SubComponentKind};
use pipelit_config::{ComponentType, PortType};
use pipelit_state::StateView;

/// Triggers just surface whatever payload started the execution.
struct PassThroughTrigger;

#[async_trait]
impl Component for PassThroughTrigger {
  async fn execute(&self, _config: &ResolvedConfig, state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([
      ("text".to_string(), Value::String(state.trigger().text.clone())),
      ("payload".to_string(), state.trigger().payload.clone()),
    ]))
  }
}

/// Stands in for a real model call: echoes its resolved system prompt,
/// which the Expression Resolver has already rendered against trigger and
/// upstream node output before this ever runs.
struct EchoAgent;

#[async_trait]
impl Component for EchoAgent {
  async fn execute(&self, config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([(
      "output".to_string(),
      Value::String(config.system_prompt.clone().unwrap_or_default()),
    )]))
  }
}

/// A tool that does nothing but report it ran; real tools are components
/// an integrator supplies.
struct NoopTool;

#[async_trait]
impl Component for NoopTool {
  async fn execute(&self, _config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([("ran".to_string(), Value::Bool(true))]))
  }
}

/// Routes on a statically configured `route` key (`extra_config.route`)
/// rather than any real decision logic, so a demo workflow can still
/// exercise conditional edges.
struct ConfiguredSwitch;

#[async_trait]
impl Component for ConfiguredSwitch {
  async fn execute(&self, config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    let mut out = Map::new();
    if let Some(route) = config.extra_config.get("route") {
      out.insert("_route".to_string(), route.clone());
    }
    Ok(out)
  }
}

/// A parser that hands its input straight back through.
struct PassThroughParser;

#[async_trait]
impl Component for PassThroughParser {
  async fn execute(&self, config: &ResolvedConfig, _state: StateView<'_>) -> Result<Map<String, Value>, ComponentError> {
    Ok(Map::from_iter([(
      "parsed".to_string(),
      config.extra_config.get("input").cloned().unwrap_or(Value::Null),
    )]))
  }
}

pub fn demo_registry() -> ComponentRegistry {
  ComponentRegistry::builder()
    .register(NodeTypeSpec::new(ComponentType::TriggerChat).with_output("text", PortType::String), PassThroughTrigger)
    .register(NodeTypeSpec::new(ComponentType::TriggerWebhook).with_output("payload", PortType::Object), PassThroughTrigger)
    .register(NodeTypeSpec::new(ComponentType::TriggerSchedule).with_output("text", PortType::String), PassThroughTrigger)
    .register(
      NodeTypeSpec::new(ComponentType::Agent)
        .with_output("output", PortType::String)
        .requires(SubComponentKind::Model),
      EchoAgent,
    )
    .register(NodeTypeSpec::new(ComponentType::Tool).with_output("result", PortType::Object), NoopTool)
    .register(NodeTypeSpec::new(ComponentType::Switch).with_input("value", PortType::Any, false), ConfiguredSwitch)
    .register(NodeTypeSpec::new(ComponentType::Router).with_input("value", PortType::Any, false), ConfiguredSwitch)
    .register(
      NodeTypeSpec::new(ComponentType::OutputParser).with_output("parsed", PortType::Any),
      PassThroughParser,
    )
    .build()
}
