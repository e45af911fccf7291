use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity attached to a contract's violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  #[default]
  Error,
  Warning,
  Info,
}

impl std::fmt::Display for Severity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Severity::Error => "error",
      Severity::Warning => "warning",
      Severity::Info => "info",
    };
    f.write_str(s)
  }
}

/// Value constraints for a single field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstraintDef {
  /// Minimum numeric value (inclusive).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min: Option<f64>,

  /// Maximum numeric value (inclusive).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max: Option<f64>,

  /// Minimum string/list length.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_length: Option<usize>,

  /// Maximum string/list length.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_length: Option<usize>,

  /// Allowed values.
  #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
  pub one_of: Option<Vec<Value>>,

  /// Regex the string value must match.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pattern: Option<String>,
}

/// A data contract between producer and consumer nodes.
///
/// `source` and `target` are each optional: a contract may constrain the
/// output boundary of a producer, the input boundary of a consumer, or
/// both. Each configured check runs independently; every failed check
/// yields one violation carrying this contract's severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDef {
  pub id: String,

  /// Producer node whose output this contract validates.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,

  /// Consumer node whose assembled input this contract validates.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,

  /// JSON Schema the data must satisfy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<Value>,

  /// Fields that must be present.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub required_fields: Vec<String>,

  /// Field name to expected type name
  /// (`string`, `integer`, `float`, `number`, `boolean`, `list`, `dict`, `null`).
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub types: BTreeMap<String, String>,

  /// Field name to value constraints.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub constraints: BTreeMap<String, ConstraintDef>,

  /// Context keys to union when validating input. When empty, every
  /// context entry is unioned.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub input_sources: Vec<String>,

  /// Severity carried onto violations produced by this contract.
  #[serde(default)]
  pub severity: Severity,
}
