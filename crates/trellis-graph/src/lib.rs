//! Trellis Graph
//!
//! Dependency-graph machinery for behavioral test graphs: structural
//! validation (duplicate ids, dangling edge endpoints), deterministic
//! topological scheduling via Kahn's algorithm with cycle detection, and
//! the per-run execution state machine with its append-only transition
//! log and visualization exports.
//!
//! Everything here is pure computation consulted by the engine; nothing
//! performs node execution.

mod error;
mod graph;
mod state;

pub use error::GraphError;
pub use graph::DependencyGraph;
pub use state::{ExecutionStateMachine, NodeState, ReplayFrame, StateTransition};
