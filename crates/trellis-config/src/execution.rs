use serde::{Deserialize, Serialize};

/// How a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
  #[default]
  Normal,
  /// Re-execute a previously recorded run with the same seed.
  Replay,
  /// Probabilistically drop or corrupt node inputs, seeded for
  /// reproducibility.
  Chaos,
  Debug,
  Simulation,
}

impl std::fmt::Display for ExecutionMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ExecutionMode::Normal => "normal",
      ExecutionMode::Replay => "replay",
      ExecutionMode::Chaos => "chaos",
      ExecutionMode::Debug => "debug",
      ExecutionMode::Simulation => "simulation",
    };
    f.write_str(s)
  }
}

fn default_drop_rate() -> f64 {
  0.1
}

fn default_corrupt_rate() -> f64 {
  0.05
}

/// Fault injection rates for chaos mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
  /// Probability of dropping a random input key per node.
  #[serde(default = "default_drop_rate")]
  pub drop_rate: f64,

  /// Probability of corrupting a random input value per node.
  #[serde(default = "default_corrupt_rate")]
  pub corrupt_rate: f64,
}

impl Default for ChaosConfig {
  fn default() -> Self {
    Self {
      drop_rate: default_drop_rate(),
      corrupt_rate: default_corrupt_rate(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_min_safety_score() -> f64 {
  0.3
}

/// Governance gate settings applied around each node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,

  #[serde(default)]
  pub redact_pii: bool,

  /// Whether a critical policy violation on input blocks the node.
  #[serde(default)]
  pub block_violations: bool,

  /// Outputs scoring below this threshold are blocked.
  #[serde(default = "default_min_safety_score")]
  pub min_safety_score: f64,
}

impl Default for GovernanceConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      redact_pii: false,
      block_violations: false,
      min_safety_score: default_min_safety_score(),
    }
  }
}

/// Caller-supplied execution configuration for one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunConfig {
  /// Default provider for nodes that don't name one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,

  /// Default model for nodes that don't name one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,

  /// Seed for every RNG-dependent decision. Fixed seed means fully
  /// reproducible chaos injection.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub seed: Option<u64>,

  #[serde(default)]
  pub mode: ExecutionMode,

  #[serde(default)]
  pub chaos_config: ChaosConfig,

  /// Wall-clock budget for the whole run, checked between nodes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_seconds: Option<u64>,

  #[serde(default)]
  pub governance: GovernanceConfig,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mode_round_trip() {
    let mode: ExecutionMode = serde_json::from_str("\"chaos\"").unwrap();
    assert_eq!(mode, ExecutionMode::Chaos);
    assert_eq!(serde_json::to_string(&mode).unwrap(), "\"chaos\"");
  }

  #[test]
  fn test_run_config_defaults() {
    let config: RunConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.mode, ExecutionMode::Normal);
    assert!(config.seed.is_none());
    assert!((config.chaos_config.drop_rate - 0.1).abs() < f64::EPSILON);
    assert!(config.governance.enabled);
    assert!(!config.governance.block_violations);
  }
}
