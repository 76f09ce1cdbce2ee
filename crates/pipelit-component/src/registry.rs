use std::collections::HashMap;
use std::sync::Arc;

use pipelit_config::ComponentType;

use crate::component::Component;
use crate::spec::NodeTypeSpec;

/// Construct-then-freeze registry of component implementations and their
/// type metadata, keyed by `ComponentType`.
///
/// Build one with `ComponentRegistryBuilder`, then share the frozen
/// `ComponentRegistry` (it's cheap to clone — everything inside is an
/// `Arc`) across every worker.
#[derive(Clone)]
pub struct ComponentRegistry {
  entries: Arc<HashMap<ComponentType, Entry>>,
}

struct Entry {
  spec: NodeTypeSpec,
  component: Arc<dyn Component>,
}

impl ComponentRegistry {
  pub fn builder() -> ComponentRegistryBuilder {
    ComponentRegistryBuilder::default()
  }

  pub fn spec(&self, component_type: ComponentType) -> Option<&NodeTypeSpec> {
    self.entries.get(&component_type).map(|e| &e.spec)
  }

  pub fn component(&self, component_type: ComponentType) -> Option<Arc<dyn Component>> {
    self.entries.get(&component_type).map(|e| e.component.clone())
  }

  pub fn contains(&self, component_type: ComponentType) -> bool {
    self.entries.contains_key(&component_type)
  }
}

#[derive(Default)]
pub struct ComponentRegistryBuilder {
  entries: HashMap<ComponentType, Entry>,
}

impl ComponentRegistryBuilder {
  pub fn register(
    mut self,
    spec: NodeTypeSpec,
    component: impl Component + 'static,
  ) -> Self {
    let component_type = spec.component_type;
    self.entries.insert(
      component_type,
      Entry {
        spec,
        component: Arc::new(component),
      },
    );
    self
  }

  /// Freeze the registry. After this there is no further mutation API —
  /// the registry is read-only for the rest of the process's life.
  pub fn build(self) -> ComponentRegistry {
    ComponentRegistry {
      entries: Arc::new(self.entries),
    }
  }
}
