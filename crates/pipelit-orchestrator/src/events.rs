//! Thin wrapper turning orchestrator happenings into `pipelit-broadcast`
//! events on both the workflow-wide and execution-scoped channels.

use serde_json::Value;

use pipelit_broadcast::{execution_channel, workflow_channel, Event};

use crate::context::Deps;

pub fn publish(deps: &Deps, workflow_slug: &str, execution_id: &str, event_type: &str, data: Value) {
  deps.bus.publish(Event::new(event_type, workflow_channel(workflow_slug), data.clone()));
  deps.bus.publish(Event::new(event_type, execution_channel(execution_id), data));
}
