use serde::{Deserialize, Serialize};

use crate::assertion::AssertionDef;
use crate::contract::ContractDef;
use crate::edge::Edge;
use crate::node::NodeDef;

/// A complete behavioral test graph definition.
///
/// Immutable once loaded for a run. Node ids must be unique and every
/// edge or contract endpoint must reference an existing node; both are
/// enforced by the scheduler before any node executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
  pub id: String,
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<Edge>,
  #[serde(default)]
  pub assertions: Vec<AssertionDef>,
  #[serde(default)]
  pub contracts: Vec<ContractDef>,
}

impl GraphDef {
  /// Get a node by id.
  pub fn get_node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  /// Edges as `(from, to)` pairs.
  pub fn edge_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
    self.edges.iter().map(|e| (e.from.as_str(), e.to.as_str()))
  }
}
