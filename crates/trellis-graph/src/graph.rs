use std::collections::{BTreeMap, BTreeSet, HashMap};

use trellis_config::GraphDef;

use crate::error::GraphError;

/// Dependency graph structure for scheduling and analysis.
///
/// Node iteration is BTree-ordered so every derived computation -
/// topological order included - is reproducible across runs of the same
/// graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  /// Adjacency list: node_id -> downstream node_ids.
  adjacency: BTreeMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> upstream node_ids.
  reverse_adjacency: BTreeMap<String, Vec<String>>,
  /// Incoming edge count per node.
  in_degree: HashMap<String, usize>,
}

impl DependencyGraph {
  /// Build and structurally validate a graph from a definition.
  ///
  /// Rejects duplicate node ids and edges whose endpoints do not name an
  /// existing node. Cycles are detected later, by [`topological_order`].
  ///
  /// [`topological_order`]: DependencyGraph::topological_order
  pub fn from_def(def: &GraphDef) -> Result<Self, GraphError> {
    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut reverse_adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();

    for node in &def.nodes {
      if adjacency.contains_key(&node.id) {
        return Err(GraphError::DuplicateNode {
          node_id: node.id.clone(),
        });
      }
      adjacency.insert(node.id.clone(), Vec::new());
      reverse_adjacency.insert(node.id.clone(), Vec::new());
      in_degree.insert(node.id.clone(), 0);
    }

    for (from, to) in def.edge_pairs() {
      for endpoint in [from, to] {
        if !adjacency.contains_key(endpoint) {
          return Err(GraphError::UnknownNode {
            node_id: endpoint.to_string(),
          });
        }
      }
      if let Some(downstream) = adjacency.get_mut(from) {
        downstream.push(to.to_string());
      }
      if let Some(upstream) = reverse_adjacency.get_mut(to) {
        upstream.push(from.to_string());
      }
      *in_degree.entry(to.to_string()).or_insert(0) += 1;
    }

    Ok(Self {
      adjacency,
      reverse_adjacency,
      in_degree,
    })
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Number of nodes in the graph.
  pub fn node_count(&self) -> usize {
    self.adjacency.len()
  }

  /// Compute the execution order via Kahn's algorithm.
  ///
  /// Repeatedly removes zero-in-degree nodes, decrementing successors.
  /// Ties break by node id (BTree-ordered ready set) so the order is
  /// deterministic for identical graphs. If the result is shorter than
  /// the node count, the remainder contains at least one cycle and the
  /// call fails naming one cycle member; no node may execute.
  pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
    let mut in_degree = self.in_degree.clone();
    let mut ready: BTreeSet<String> = in_degree
      .iter()
      .filter(|(_, d)| **d == 0)
      .map(|(id, _)| id.clone())
      .collect();
    let mut order = Vec::with_capacity(self.adjacency.len());

    while let Some(node_id) = ready.pop_first() {
      for next in self.downstream(&node_id) {
        if let Some(d) = in_degree.get_mut(next) {
          *d -= 1;
          if *d == 0 {
            ready.insert(next.clone());
          }
        }
      }
      order.push(node_id);
    }

    if order.len() != self.adjacency.len() {
      // Smallest unscheduled id keeps the error message stable too.
      let node_id = self
        .adjacency
        .keys()
        .find(|id| in_degree.get(*id).is_some_and(|d| *d > 0))
        .cloned()
        .unwrap_or_default();
      return Err(GraphError::Cycle { node_id });
    }

    Ok(order)
  }
}
