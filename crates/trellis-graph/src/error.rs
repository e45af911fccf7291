//! Error types for graph validation and scheduling.

use thiserror::Error;

/// Structural errors that prevent a graph from executing at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  /// Two nodes share the same id.
  #[error("duplicate node id '{node_id}' in graph")]
  DuplicateNode { node_id: String },

  /// An edge endpoint names a node that does not exist.
  #[error("edge references unknown node '{node_id}'")]
  UnknownNode { node_id: String },

  /// The dependency graph is not acyclic.
  #[error("graph contains a cycle through node '{node_id}' - cannot execute")]
  Cycle { node_id: String },
}
