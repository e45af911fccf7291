//! Execution trace records.
//!
//! The [`ExecutionTrace`] is the single source of truth for one run:
//! created at run start, appended to during execution, frozen at
//! completion. It is the only artifact handed to persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use trellis_assertions::AssertionResult;
use trellis_config::{ExecutionMode, GraphDef};
use trellis_contracts::ContractViolation;

/// Terminal and in-flight status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Passed,
  Failed,
  Error,
}

impl std::fmt::Display for RunStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RunStatus::Pending => "pending",
      RunStatus::Running => "running",
      RunStatus::Passed => "passed",
      RunStatus::Failed => "failed",
      RunStatus::Error => "error",
    };
    f.write_str(s)
  }
}

/// Captured output from one agent node execution. Immutable once
/// created; owned by the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
  pub node_id: String,
  pub agent_type: String,
  pub input_data: Map<String, Value>,
  pub output_data: Map<String, Value>,
  pub latency_ms: f64,
  pub cost_usd: f64,
  pub tokens_in: u64,
  pub tokens_out: u64,
  pub provider: String,
  pub model: String,
  pub timestamp: DateTime<Utc>,
  pub trace_id: String,
}

/// Full execution trace for one graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
  pub run_id: String,
  pub graph_id: String,
  pub graph_hash: String,
  pub mode: ExecutionMode,
  pub seed: Option<u64>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub agent_outputs: Vec<AgentOutput>,
  pub assertion_results: Vec<AssertionResult>,
  pub contract_violations: Vec<ContractViolation>,
  pub total_latency_ms: f64,
  pub total_cost_usd: f64,
  pub status: RunStatus,
  pub error: Option<String>,
}

impl ExecutionTrace {
  /// Fresh trace for a run that is about to start.
  pub fn new(
    run_id: String,
    graph_id: String,
    graph_hash: String,
    mode: ExecutionMode,
    seed: Option<u64>,
  ) -> Self {
    Self {
      run_id,
      graph_id,
      graph_hash,
      mode,
      seed,
      started_at: Utc::now(),
      completed_at: None,
      agent_outputs: Vec::new(),
      assertion_results: Vec::new(),
      contract_violations: Vec::new(),
      total_latency_ms: 0.0,
      total_cost_usd: 0.0,
      status: RunStatus::Pending,
      error: None,
    }
  }

  /// Number of assertions that passed.
  pub fn passed_assertions(&self) -> usize {
    self.assertion_results.iter().filter(|r| r.passed).count()
  }

  /// Compact digest for callers that only need the outcome.
  pub fn summary(&self) -> Value {
    json!({
      "run_id": self.run_id,
      "status": self.status,
      "assertions": self.assertion_results,
      "contract_violations": self.contract_violations,
      "latency_ms": self.total_latency_ms,
      "cost_usd": self.total_cost_usd,
    })
  }
}

/// Deterministic content hash of a graph definition for versioning and
/// audit: sha256 over the canonical JSON serialization, truncated to 16
/// hex characters.
pub fn graph_hash(graph: &GraphDef) -> String {
  // Map keys serialize sorted, so identical definitions hash identically.
  let canonical = serde_json::to_vec(graph).unwrap_or_default();
  let digest = Sha256::digest(&canonical);
  hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_config::{Edge, NodeDef};

  fn graph() -> GraphDef {
    GraphDef {
      id: "g1".to_string(),
      nodes: vec![NodeDef {
        id: "a".to_string(),
        agent_type: "mock".to_string(),
        config: Map::new(),
        inputs: Vec::new(),
      }],
      edges: Vec::new(),
      assertions: Vec::new(),
      contracts: Vec::new(),
    }
  }

  #[test]
  fn test_hash_is_stable_and_short() {
    let g = graph();
    let h1 = graph_hash(&g);
    let h2 = graph_hash(&g);
    assert_eq!(h1, h2);
    assert_eq!(h1.len(), 16);
  }

  #[test]
  fn test_hash_changes_with_content() {
    let g1 = graph();
    let mut g2 = graph();
    g2.edges.push(Edge {
      from: "a".to_string(),
      to: "a".to_string(),
    });
    assert_ne!(graph_hash(&g1), graph_hash(&g2));
  }

  #[test]
  fn test_status_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&RunStatus::Passed).unwrap(), "\"passed\"");
  }
}
