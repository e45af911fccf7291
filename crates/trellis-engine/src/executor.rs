//! Agent executor seam and the in-tree mock.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by an agent executor implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AgentError {
  pub message: String,
}

impl AgentError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// The agent execution capability.
///
/// Implementations wrap concrete LLM providers; the engine only knows
/// this interface. `execute` returns the node's output document; the
/// `_tokens_in` / `_tokens_out` hints inside it feed cost accounting.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
  async fn execute(
    &self,
    agent_type: &str,
    config: &Map<String, Value>,
    input: &Map<String, Value>,
  ) -> Result<Map<String, Value>, AgentError>;

  /// Models this executor can serve.
  fn models(&self) -> Vec<String>;
}

/// Deterministic mock executor for tests and offline runs.
///
/// Responses can be scripted per agent type; unscripted types get a
/// canned response with token counts derived from the input size.
#[derive(Debug, Default)]
pub struct MockAgentExecutor {
  scripted: std::collections::HashMap<String, Map<String, Value>>,
}

impl MockAgentExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Script a fixed output document for an agent type.
  pub fn with_response(mut self, agent_type: impl Into<String>, output: Map<String, Value>) -> Self {
    self.scripted.insert(agent_type.into(), output);
    self
  }
}

#[async_trait]
impl AgentExecutor for MockAgentExecutor {
  async fn execute(
    &self,
    agent_type: &str,
    _config: &Map<String, Value>,
    input: &Map<String, Value>,
  ) -> Result<Map<String, Value>, AgentError> {
    if let Some(output) = self.scripted.get(agent_type) {
      return Ok(output.clone());
    }

    let input_size = serde_json::to_string(input).map(|s| s.len()).unwrap_or(0);
    let mut output = Map::new();
    output.insert(
      "response".to_string(),
      Value::String(format!("Mock response for {agent_type}")),
    );
    output.insert("confidence".to_string(), Value::from(0.95));
    output.insert("_tokens_in".to_string(), Value::from(input_size as u64 / 4));
    output.insert("_tokens_out".to_string(), Value::from(50u64));
    Ok(output)
  }

  fn models(&self) -> Vec<String> {
    vec!["mock-model".to_string()]
  }
}

/// Token cost in USD for a provider.
///
/// Rates are per 1k tokens; unknown providers fall back to a
/// conservative default.
pub fn estimate_cost(provider: &str, tokens_in: u64, tokens_out: u64) -> f64 {
  let (rate_in, rate_out) = match provider {
    "openai" => (0.0025, 0.01),
    "anthropic" => (0.003, 0.015),
    "mock" => (0.001, 0.002),
    _ => (0.001, 0.002),
  };
  (tokens_in as f64 * rate_in + tokens_out as f64 * rate_out) / 1000.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_mock_default_response() {
    let executor = MockAgentExecutor::new();
    let output = executor
      .execute("researcher", &Map::new(), &Map::new())
      .await
      .unwrap();

    assert_eq!(output["response"], json!("Mock response for researcher"));
    assert_eq!(output["_tokens_out"], json!(50));
  }

  #[tokio::test]
  async fn test_mock_scripted_response() {
    let mut scripted = Map::new();
    scripted.insert("response".to_string(), json!("ok"));
    let executor = MockAgentExecutor::new().with_response("checker", scripted);

    let output = executor
      .execute("checker", &Map::new(), &Map::new())
      .await
      .unwrap();
    assert_eq!(output["response"], json!("ok"));
  }

  #[test]
  fn test_cost_scales_with_tokens() {
    let small = estimate_cost("mock", 100, 50);
    let large = estimate_cost("mock", 1000, 500);
    assert!(large > small);
    assert!((small - (100.0 * 0.001 + 50.0 * 0.002) / 1000.0).abs() < 1e-12);
  }
}
