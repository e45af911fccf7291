use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Builtin assertion kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionType {
  Equals,
  NotEquals,
  Contains,
  NotContains,
  MatchesRegex,
  JsonPath,
  Range,
  GreaterThan,
  LessThan,
  SemanticSimilarity,
  Convergence,
  MemoryRecall,
  SchemaValid,
  LatencyUnder,
  CostUnder,
}

/// An assertion kind: one of the closed builtin variants, or the name of
/// a caller-registered custom handler.
///
/// Unknown names deserialize as `Custom`; the engine fails them with an
/// explicit message unless a handler was registered under that name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssertionKind {
  Builtin(AssertionType),
  Custom(String),
}

impl std::fmt::Display for AssertionKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      AssertionKind::Builtin(t) => {
        // serde's snake_case rename is the canonical wire name
        let s = serde_json::to_value(t).ok();
        match s.as_ref().and_then(Value::as_str) {
          Some(name) => f.write_str(name),
          None => write!(f, "{:?}", t),
        }
      }
      AssertionKind::Custom(name) => f.write_str(name),
    }
  }
}

fn default_field() -> String {
  "response".to_string()
}

/// A behavioral expectation evaluated against the final execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionDef {
  /// Assertion id; generated positionally when omitted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  #[serde(rename = "type")]
  pub kind: AssertionKind,

  /// Node whose output the assertion targets.
  #[serde(default)]
  pub target: String,

  /// Field within the target output to resolve.
  #[serde(default = "default_field")]
  pub field: String,

  /// Expected value; shape depends on the kind (scalar for `equals`,
  /// `{min, max}` for `range`, `{rounds, threshold}` for `convergence`, ...).
  #[serde(default)]
  pub expected: Value,

  /// Kind-specific parameters, e.g. `threshold` for `semantic_similarity`
  /// or `json_path` for `json_path`.
  #[serde(default)]
  pub config: Map<String, Value>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builtin_kind_parses() {
    let def: AssertionDef = serde_json::from_value(serde_json::json!({
      "type": "latency_under",
      "target": "planner",
      "expected": 2000
    }))
    .unwrap();
    assert_eq!(def.kind, AssertionKind::Builtin(AssertionType::LatencyUnder));
    assert_eq!(def.field, "response");
  }

  #[test]
  fn test_unknown_kind_falls_back_to_custom() {
    let def: AssertionDef = serde_json::from_value(serde_json::json!({
      "type": "tone_check",
      "target": "writer"
    }))
    .unwrap();
    assert_eq!(def.kind, AssertionKind::Custom("tone_check".to_string()));
  }

  #[test]
  fn test_kind_display_uses_wire_name() {
    let kind = AssertionKind::Builtin(AssertionType::SemanticSimilarity);
    assert_eq!(kind.to_string(), "semantic_similarity");
  }
}
