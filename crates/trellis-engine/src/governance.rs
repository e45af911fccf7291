//! Governance gate seam.
//!
//! Safety and PII screening is an external capability; the engine only
//! consumes this interface, once before and once after each node
//! execution. Scoring internals (detectors, policy rules) live with the
//! implementation.

use serde_json::{Value, json};
use thiserror::Error;

/// Safety assessment attached to screened text. Higher is safer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyScore {
  pub overall: f64,
  pub pii: f64,
  pub policy: f64,
  pub toxicity: f64,
}

impl SafetyScore {
  /// A score reporting no findings at all.
  pub fn clean() -> Self {
    Self {
      overall: 1.0,
      pii: 1.0,
      policy: 1.0,
      toxicity: 1.0,
    }
  }

  /// Compact representation recorded in node output metadata.
  pub fn to_metadata(&self) -> Value {
    json!({
      "overall": round3(self.overall),
      "pii": round3(self.pii),
      "policy": round3(self.policy),
      "toxicity": round3(self.toxicity),
    })
  }
}

fn round3(x: f64) -> f64 {
  (x * 1000.0).round() / 1000.0
}

/// Raised when the gate refuses to let text pass.
#[derive(Debug, Error)]
pub enum GovernanceError {
  /// Critical policy violation on input with blocking enabled.
  #[error("policy violation: {reason}")]
  PolicyViolation { reason: String },

  /// Output safety score below the configured threshold.
  #[error("safety score {score:.3} below threshold {threshold:.3}")]
  BelowThreshold { score: f64, threshold: f64 },
}

/// The governance capability consulted around each node execution.
///
/// `process_input` screens the input envelope before the agent runs and
/// may return a redacted payload; `process_output` screens the agent's
/// response text. Either may refuse with a [`GovernanceError`], which
/// the engine converts into a blocked-node failure.
pub trait GovernanceGate: Send + Sync {
  fn process_input(&self, text: &str) -> Result<(String, SafetyScore), GovernanceError>;
  fn process_output(&self, text: &str) -> Result<(String, SafetyScore), GovernanceError>;
}

/// Gate that passes everything through unchanged with clean scores.
/// Useful for tests and offline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveGate;

impl GovernanceGate for PermissiveGate {
  fn process_input(&self, text: &str) -> Result<(String, SafetyScore), GovernanceError> {
    Ok((text.to_string(), SafetyScore::clean()))
  }

  fn process_output(&self, text: &str) -> Result<(String, SafetyScore), GovernanceError> {
    Ok((text.to_string(), SafetyScore::clean()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_metadata_rounds_to_three_places() {
    let score = SafetyScore {
      overall: 0.123456,
      pii: 1.0,
      policy: 0.9999,
      toxicity: 0.0,
    };
    let meta = score.to_metadata();
    assert_eq!(meta["overall"], json!(0.123));
    assert_eq!(meta["policy"], json!(1.0));
  }

  #[test]
  fn test_permissive_gate_passes_through() {
    let (text, score) = PermissiveGate.process_input("hello").unwrap();
    assert_eq!(text, "hello");
    assert!((score.overall - 1.0).abs() < f64::EPSILON);
  }
}
