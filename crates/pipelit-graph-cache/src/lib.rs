//! Graph Cache (C3).
//!
//! `get_or_build(workflow_id, trigger_node_id, structural_hash, build)` —
//! keyed, TTL'd, LRU-capped cache of compiled plans. Compiled plans hold
//! closures/trait objects and are not serializable across processes, so
//! this cache is strictly per-process; cross-process coordination is via
//! an invalidation broadcast all replicas subscribe to. The broadcast
//! never blocks on a slow or absent consumer.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::broadcast;
use tracing::debug;

use pipelit_config::Workflow;

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_CAPACITY: usize = 256;

/// The cache key: a trigger-scoped plan is only valid for one
/// `(workflow_id, trigger_node_id, structural_hash)` tuple — any edit to
/// the workflow's nodes/edges changes the hash and misses the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub workflow_id: String,
  pub trigger_node_id: String,
  pub structural_hash: u64,
}

/// Hash a workflow's nodes and edges for cache-keying purposes. Two
/// workflows (or two versions of the same one) with identical nodes and
/// edges hash identically regardless of field ordering, since the
/// underlying maps already compare by content.
pub fn structural_hash(workflow: &Workflow) -> u64 {
  let mut hasher = DefaultHasher::new();
  // HashMap iteration order is unspecified, so hash a stably-sorted
  // projection instead of the map directly.
  let mut node_ids: Vec<&String> = workflow.nodes.keys().collect();
  node_ids.sort();
  for id in node_ids {
    let node = &workflow.nodes[id];
    // serde_json::Value implements a content hash via its canonical
    // string form, which is stable across runs for the same data.
    serde_json::to_string(node).unwrap_or_default().hash(&mut hasher);
  }
  let mut edges = workflow.edges.clone();
  edges.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));
  for edge in &edges {
    serde_json::to_string(edge).unwrap_or_default().hash(&mut hasher);
  }
  hasher.finish()
}

struct Entry<T> {
  plan: T,
  built_at: Instant,
}

/// Per-process cache of compiled plans of type `T` (the workspace's
/// `pipelit_builder::Plan`, kept generic here so this crate never needs
/// to depend on the builder).
pub struct GraphCache<T: Clone> {
  inner: Mutex<LruCache<CacheKey, Entry<T>>>,
  ttl: Duration,
  invalidations: broadcast::Sender<CacheKey>,
}

impl<T: Clone> GraphCache<T> {
  pub fn new() -> Self {
    Self::with_capacity_and_ttl(DEFAULT_CAPACITY, DEFAULT_TTL)
  }

  pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
    let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
    let (tx, _rx) = broadcast::channel(64);
    Self {
      inner: Mutex::new(LruCache::new(capacity)),
      ttl,
      invalidations: tx,
    }
  }

  /// Subscribe to invalidation events (every process replica does this
  /// once at startup).
  pub fn subscribe_invalidations(&self) -> broadcast::Receiver<CacheKey> {
    self.invalidations.subscribe()
  }

  /// Fetch a cached plan, or build (and cache) one via `build` on a miss
  /// or TTL expiry. `build` only runs when needed.
  pub fn get_or_build<F, E>(&self, key: CacheKey, build: F) -> Result<T, E>
  where
    F: FnOnce() -> Result<T, E>,
  {
    {
      let mut guard = self.inner.lock().expect("graph cache mutex poisoned");
      if let Some(entry) = guard.get(&key) {
        if entry.built_at.elapsed() < self.ttl {
          return Ok(entry.plan.clone());
        }
        guard.pop(&key);
      }
    }

    let plan = build()?;

    let mut guard = self.inner.lock().expect("graph cache mutex poisoned");
    guard.put(
      key,
      Entry {
        plan: plan.clone(),
        built_at: Instant::now(),
      },
    );
    Ok(plan)
  }

  /// Invalidate every cached plan for a workflow (any node/edge
  /// mutation does this) and publish the invalidation so other process
  /// replicas drop their own cached copies too.
  pub fn invalidate_workflow(&self, workflow_id: &str) {
    let mut guard = self.inner.lock().expect("graph cache mutex poisoned");
    let stale: Vec<CacheKey> = guard
      .iter()
      .filter(|(k, _)| k.workflow_id == workflow_id)
      .map(|(k, _)| k.clone())
      .collect();
    for key in stale {
      guard.pop(&key);
      debug!(workflow_id, trigger_node_id = %key.trigger_node_id, "graph cache invalidated");
      // A send error just means no replica is currently listening.
      let _ = self.invalidations.send(key);
    }
  }

  pub fn len(&self) -> usize {
    self.inner.lock().expect("graph cache mutex poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: Clone> Default for GraphCache<T> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;
  use std::rc::Rc;

  fn key(hash: u64) -> CacheKey {
    CacheKey {
      workflow_id: "wf1".to_string(),
      trigger_node_id: "t1".to_string(),
      structural_hash: hash,
    }
  }

  #[test]
  fn builds_once_then_hits_cache() {
    let cache: GraphCache<u32> = GraphCache::new();
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let build = move || -> Result<u32, ()> {
      c.set(c.get() + 1);
      Ok(42)
    };
    assert_eq!(cache.get_or_build(key(1), build.clone()).unwrap(), 42);
    assert_eq!(cache.get_or_build(key(1), build).unwrap(), 42);
    assert_eq!(calls.get(), 1);
  }

  #[test]
  fn different_structural_hash_is_a_distinct_key() {
    let cache: GraphCache<u32> = GraphCache::new();
    cache.get_or_build(key(1), || Ok::<_, ()>(1)).unwrap();
    cache.get_or_build(key(2), || Ok::<_, ()>(2)).unwrap();
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn invalidate_workflow_drops_entries_and_publishes() {
    let cache: GraphCache<u32> = GraphCache::new();
    let mut rx = cache.subscribe_invalidations();
    cache.get_or_build(key(1), || Ok::<_, ()>(1)).unwrap();
    assert_eq!(cache.len(), 1);
    cache.invalidate_workflow("wf1");
    assert_eq!(cache.len(), 0);
    assert!(rx.try_recv().is_ok());
  }

  #[test]
  fn ttl_expiry_forces_rebuild() {
    let cache: GraphCache<u32> = GraphCache::with_capacity_and_ttl(8, Duration::from_millis(1));
    cache.get_or_build(key(1), || Ok::<_, ()>(1)).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    cache
      .get_or_build(key(1), move || {
        c.set(c.get() + 1);
        Ok::<_, ()>(2)
      })
      .unwrap();
    assert_eq!(calls.get(), 1);
  }

  #[test]
  fn structural_hash_is_stable_regardless_of_map_iteration_order() {
    use pipelit_config::{ComponentType, Node};
    use std::collections::HashMap;

    let mut nodes = HashMap::new();
    nodes.insert("a".to_string(), Node::new("a", ComponentType::Agent));
    nodes.insert("b".to_string(), Node::new("b", ComponentType::Tool));

    let wf = Workflow {
      workflow_id: "wf1".to_string(),
      slug: "wf1".to_string(),
      name: "wf".to_string(),
      nodes,
      edges: vec![],
      deleted_at: None,
      error_handler_workflow_slug: None,
    };
    let h1 = structural_hash(&wf);
    let h2 = structural_hash(&wf);
    assert_eq!(h1, h2);
  }
}
