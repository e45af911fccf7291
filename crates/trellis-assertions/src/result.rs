use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trellis_config::AssertionKind;

/// Result of evaluating a single assertion. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
  pub assertion_id: String,
  #[serde(rename = "type")]
  pub kind: AssertionKind,
  pub target_node: String,
  pub expected: Value,
  pub actual: Value,
  pub passed: bool,
  pub message: String,
  pub evaluated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub metadata: Map<String, Value>,
}
