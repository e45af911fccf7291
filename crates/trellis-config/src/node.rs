use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_agent_type() -> String {
  "mock".to_string()
}

/// A single agent node in a test graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  /// Unique node id within the graph.
  pub id: String,

  /// Agent capability tag, e.g. "researcher" or "negotiator".
  #[serde(rename = "type", default = "default_agent_type")]
  pub agent_type: String,

  /// Opaque configuration passed through to the agent executor.
  /// Recognized keys include `provider` and `model`.
  #[serde(default)]
  pub config: Map<String, Value>,

  /// Node ids whose outputs feed this node's input.
  #[serde(default)]
  pub inputs: Vec<String>,
}

impl NodeDef {
  /// Provider name from node config, if set.
  pub fn provider(&self) -> Option<&str> {
    self.config.get("provider").and_then(Value::as_str)
  }

  /// Model name from node config, if set.
  pub fn model(&self) -> Option<&str> {
    self.config.get("model").and_then(Value::as_str)
  }
}
