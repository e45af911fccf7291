use serde::{Deserialize, Serialize};

/// A directed dependency edge between two nodes.
///
/// `from` must complete before `to` may execute. Both endpoints must name
/// existing nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
}
