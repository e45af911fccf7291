//! Per-run execution state tracking.
//!
//! One [`ExecutionStateMachine`] instance exists per run; there is no
//! shared mutation across runs. States are intentionally not validated
//! against a transition table - chaos and debug modes force unusual
//! transitions on purpose - but every transition is appended to an
//! immutable log that visualization consumers read back through
//! [`transitions`](ExecutionStateMachine::transitions) and
//! [`replay`](ExecutionStateMachine::replay).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  Pending,
  Ready,
  Running,
  Completed,
  Failed,
  Skipped,
}

impl std::fmt::Display for NodeState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      NodeState::Pending => "pending",
      NodeState::Ready => "ready",
      NodeState::Running => "running",
      NodeState::Completed => "completed",
      NodeState::Failed => "failed",
      NodeState::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

/// One entry of the append-only transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
  pub node_id: String,
  pub from: NodeState,
  pub to: NodeState,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub metadata: Map<String, Value>,
}

/// One snapshot of the replay sequence: the transition applied and the
/// resulting state of every node seen so far.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayFrame {
  pub timestamp: DateTime<Utc>,
  pub node_id: String,
  pub from: NodeState,
  pub to: NodeState,
  pub states: BTreeMap<String, NodeState>,
}

/// Tracks per-node lifecycle state for one run.
#[derive(Debug, Default)]
pub struct ExecutionStateMachine {
  states: BTreeMap<String, NodeState>,
  transitions: Vec<StateTransition>,
  edges: Vec<(String, String)>,
}

impl ExecutionStateMachine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a node in its initial state.
  pub fn add_node(&mut self, node_id: &str) {
    self.states.insert(node_id.to_string(), NodeState::Pending);
    let mut metadata = Map::new();
    metadata.insert("event".to_string(), Value::String("initialized".to_string()));
    self.transitions.push(StateTransition {
      node_id: node_id.to_string(),
      from: NodeState::Pending,
      to: NodeState::Pending,
      timestamp: Utc::now(),
      metadata,
    });
  }

  /// Register a dependency edge for visualization exports.
  pub fn add_edge(&mut self, from: &str, to: &str) {
    self.edges.push((from.to_string(), to.to_string()));
  }

  /// Move a node to a new state, logging the transition.
  ///
  /// Unknown nodes are registered first; any state-to-state transition
  /// is accepted.
  pub fn transition(&mut self, node_id: &str, to: NodeState, metadata: Option<Map<String, Value>>) {
    if !self.states.contains_key(node_id) {
      self.add_node(node_id);
    }
    let from = self.states[node_id];
    self.states.insert(node_id.to_string(), to);
    self.transitions.push(StateTransition {
      node_id: node_id.to_string(),
      from,
      to,
      timestamp: Utc::now(),
      metadata: metadata.unwrap_or_default(),
    });
  }

  /// Current state of a node.
  pub fn state_of(&self, node_id: &str) -> Option<NodeState> {
    self.states.get(node_id).copied()
  }

  /// Current state of every node.
  pub fn current_states(&self) -> &BTreeMap<String, NodeState> {
    &self.states
  }

  /// Transition history, optionally filtered by node.
  pub fn transitions(&self, node_id: Option<&str>) -> Vec<&StateTransition> {
    match node_id {
      Some(id) => self.transitions.iter().filter(|t| t.node_id == id).collect(),
      None => self.transitions.iter().collect(),
    }
  }

  /// Replay the run as a finite sequence of state snapshots, one per
  /// transition. This is the read contract for diagram consumers - a
  /// replayable event sequence derived from the log, not live hooks.
  pub fn replay(&self) -> Vec<ReplayFrame> {
    let mut states: BTreeMap<String, NodeState> = BTreeMap::new();
    self
      .transitions
      .iter()
      .map(|t| {
        states.insert(t.node_id.clone(), t.to);
        ReplayFrame {
          timestamp: t.timestamp,
          node_id: t.node_id.clone(),
          from: t.from,
          to: t.to,
          states: states.clone(),
        }
      })
      .collect()
  }

  /// Export to Mermaid flowchart format.
  pub fn to_mermaid(&self, title: &str) -> String {
    let mut lines = vec!["flowchart TD".to_string(), format!("    subgraph {title}")];

    for (node_id, state) in &self.states {
      let safe_id = node_id.replace('-', "_");
      lines.push(format!("    {safe_id}[{node_id}]:::{state}"));
    }
    for (from, to) in &self.edges {
      let safe_from = from.replace('-', "_");
      let safe_to = to.replace('-', "_");
      lines.push(format!("    {safe_from} --> {safe_to}"));
    }
    lines.push("    end".to_string());
    lines.push(String::new());
    lines.push("    classDef pending fill:#9e9e9e,stroke:#757575".to_string());
    lines.push("    classDef ready fill:#ffeb3b,stroke:#fbc02d".to_string());
    lines.push("    classDef running fill:#2196f3,stroke:#1976d2,color:#fff".to_string());
    lines.push("    classDef completed fill:#4caf50,stroke:#388e3c,color:#fff".to_string());
    lines.push("    classDef failed fill:#f44336,stroke:#d32f2f,color:#fff".to_string());
    lines.push("    classDef skipped fill:#ff9800,stroke:#f57c00".to_string());

    lines.join("\n")
  }

  /// Export to Graphviz DOT format.
  pub fn to_dot(&self, title: &str) -> String {
    let mut lines = vec![
      format!("digraph \"{title}\" {{"),
      "    rankdir=TB;".to_string(),
      "    node [shape=box, style=filled];".to_string(),
    ];

    for (node_id, state) in &self.states {
      let color = state_color(*state);
      lines.push(format!(
        "    \"{node_id}\" [fillcolor=\"{color}\", label=\"{node_id}\\n({state})\"];"
      ));
    }
    for (from, to) in &self.edges {
      lines.push(format!("    \"{from}\" -> \"{to}\";"));
    }
    lines.push("}".to_string());

    lines.join("\n")
  }

  /// Export to a D3-compatible JSON document with nodes, links, and the
  /// full transition log.
  pub fn to_d3_json(&self) -> Value {
    let node_index: BTreeMap<&String, usize> =
      self.states.keys().enumerate().map(|(i, id)| (id, i)).collect();

    let nodes: Vec<Value> = self
      .states
      .iter()
      .enumerate()
      .map(|(i, (id, state))| {
        serde_json::json!({
          "id": id,
          "index": i,
          "state": state.to_string(),
          "color": state_color(*state),
        })
      })
      .collect();

    let links: Vec<Value> = self
      .edges
      .iter()
      .filter_map(|(from, to)| {
        let source = node_index.get(from)?;
        let target = node_index.get(to)?;
        Some(serde_json::json!({ "source": source, "target": target }))
      })
      .collect();

    serde_json::json!({
      "nodes": nodes,
      "links": links,
      "transitions": self.transitions,
    })
  }
}

fn state_color(state: NodeState) -> &'static str {
  match state {
    NodeState::Pending => "#9e9e9e",
    NodeState::Ready => "#ffeb3b",
    NodeState::Running => "#2196f3",
    NodeState::Completed => "#4caf50",
    NodeState::Failed => "#f44336",
    NodeState::Skipped => "#ff9800",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn machine_with_run() -> ExecutionStateMachine {
    let mut sm = ExecutionStateMachine::new();
    sm.add_node("a");
    sm.add_node("b");
    sm.add_edge("a", "b");
    sm.transition("a", NodeState::Running, None);
    sm.transition("a", NodeState::Completed, None);
    sm.transition("b", NodeState::Running, None);
    sm.transition("b", NodeState::Failed, None);
    sm
  }

  #[test]
  fn test_transition_updates_state_and_log() {
    let sm = machine_with_run();
    assert_eq!(sm.state_of("a"), Some(NodeState::Completed));
    assert_eq!(sm.state_of("b"), Some(NodeState::Failed));
    // 2 init entries + 4 transitions
    assert_eq!(sm.transitions(None).len(), 6);
    assert_eq!(sm.transitions(Some("a")).len(), 3);
  }

  #[test]
  fn test_transition_on_unknown_node_registers_it() {
    let mut sm = ExecutionStateMachine::new();
    sm.transition("ghost", NodeState::Skipped, None);
    assert_eq!(sm.state_of("ghost"), Some(NodeState::Skipped));
  }

  #[test]
  fn test_unusual_transitions_accepted() {
    // Debug/chaos tooling rewinds nodes; the machine must not reject it.
    let mut sm = ExecutionStateMachine::new();
    sm.add_node("a");
    sm.transition("a", NodeState::Completed, None);
    sm.transition("a", NodeState::Pending, None);
    assert_eq!(sm.state_of("a"), Some(NodeState::Pending));
  }

  #[test]
  fn test_replay_tracks_cumulative_state() {
    let sm = machine_with_run();
    let frames = sm.replay();
    assert_eq!(frames.len(), 6);
    let last = frames.last().unwrap();
    assert_eq!(last.states["a"], NodeState::Completed);
    assert_eq!(last.states["b"], NodeState::Failed);
    // Earlier frame must not know about later transitions.
    assert_eq!(frames[2].states["a"], NodeState::Running);
  }

  #[test]
  fn test_mermaid_export_shape() {
    let sm = machine_with_run();
    let diagram = sm.to_mermaid("Run");
    assert!(diagram.starts_with("flowchart TD"));
    assert!(diagram.contains("a[a]:::completed"));
    assert!(diagram.contains("a --> b"));
  }

  #[test]
  fn test_d3_export_links_by_index() {
    let sm = machine_with_run();
    let doc = sm.to_d3_json();
    assert_eq!(doc["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(doc["links"][0]["source"], 0);
    assert_eq!(doc["links"][0]["target"], 1);
  }
}
