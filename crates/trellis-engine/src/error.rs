//! Error types for graph execution.

use thiserror::Error;
use trellis_graph::GraphError;

/// Errors that abort a run.
///
/// The runner converts these into `status = error` on the trace rather
/// than surfacing them to callers; whatever partial trace was
/// accumulated before the failure is retained.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// The graph is structurally invalid (duplicate id, dangling edge,
  /// cycle). The run never starts.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// The agent executor failed for a node.
  #[error("node '{node_id}' execution failed: {message}")]
  NodeExecution { node_id: String, message: String },

  /// The governance gate blocked a node's input or output.
  #[error("governance blocked {stage} for node '{node_id}': {reason}")]
  GovernanceBlocked {
    node_id: String,
    stage: &'static str,
    reason: String,
  },

  /// The run exceeded its wall-clock budget. Checked cooperatively
  /// between nodes, never mid-node.
  #[error("execution exceeded timeout of {seconds} seconds")]
  TimeoutExceeded { seconds: u64 },
}
