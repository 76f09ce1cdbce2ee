//! Topology (C1).
//!
//! BFS reachability and cycle-aware edge filtering from a trigger node.
//! Topology never fails: unreachable nodes are silently excluded from the
//! plan the builder produces downstream.

use std::collections::{HashSet, VecDeque};

use pipelit_config::Edge;

/// The result of a reachability walk: which nodes are reachable from the
/// start node, and the edge list restricted to edges between reachable
/// nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachability {
  pub reachable: HashSet<String>,
  pub edges: Vec<Edge>,
}

/// Breadth-first reachability from `start`, following only `direct` and
/// `conditional` dataflow (sub-component edges — `llm`/`tool`/
/// `output_parser` — are never traversed; `loop_body`/`loop_return` are).
///
/// Deterministic and idempotent: the same (edges, start) always produces
/// the same `Reachability`, and running it again on the output changes
/// nothing.
pub fn reachable_from(all_edges: &[Edge], start: &str) -> Reachability {
  let mut visited: HashSet<String> = HashSet::new();
  let mut queue: VecDeque<String> = VecDeque::new();

  visited.insert(start.to_string());
  queue.push_back(start.to_string());

  while let Some(node_id) = queue.pop_front() {
    for edge in all_edges {
      if edge.source_node_id != node_id {
        continue;
      }
      if edge.edge_label.is_subcomponent() {
        continue;
      }
      if visited.insert(edge.target_node_id.clone()) {
        queue.push_back(edge.target_node_id.clone());
      }
    }
  }

  let edges = all_edges
    .iter()
    .filter(|e| visited.contains(&e.source_node_id) && visited.contains(&e.target_node_id))
    .cloned()
    .collect();

  Reachability {
    reachable: visited,
    edges,
  }
}
