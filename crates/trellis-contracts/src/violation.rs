use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_config::Severity;

/// Which contract check produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
  Schema,
  RequiredFields,
  TypeCheck,
  ValueConstraint,
}

/// Record of a single contract violation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractViolation {
  pub contract_id: String,
  pub check: CheckKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_node: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_node: Option<String>,
  /// Offending field, or `*` for whole-document checks.
  pub field: String,
  pub expected: Value,
  pub actual: Value,
  pub message: String,
  pub severity: Severity,
  pub detected_at: DateTime<Utc>,
}
