use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};
use trellis_config::{AssertionDef, AssertionKind, AssertionType};
use trellis_contracts::{JsonSchemaValidator, SchemaValidator};

use crate::result::AssertionResult;

/// Per-node execution metadata consulted when the target node id is not
/// a plain context key.
#[derive(Debug, Clone)]
pub struct OutputRecord {
  pub node_id: String,
  pub latency_ms: f64,
  pub cost_usd: f64,
  pub output_data: Map<String, Value>,
}

/// A caller-registered assertion handler: `(expected, actual, config)`
/// to pass/fail plus message, or an error that becomes a failed result.
pub type CustomHandler =
  Box<dyn Fn(&Value, &Value, &Map<String, Value>) -> Result<(bool, String), String> + Send + Sync>;

/// Engine for evaluating behavioral assertions on agent outputs.
pub struct AssertionEngine {
  custom: HashMap<String, CustomHandler>,
  schema_validator: Option<Box<dyn SchemaValidator>>,
}

impl Default for AssertionEngine {
  fn default() -> Self {
    Self::new()
  }
}

impl AssertionEngine {
  pub fn new() -> Self {
    Self {
      custom: HashMap::new(),
      schema_validator: Some(Box::new(JsonSchemaValidator)),
    }
  }

  /// Engine without the JSON Schema capability; `schema_valid`
  /// assertions fail with an explanatory message.
  pub fn without_schema_validator() -> Self {
    Self {
      custom: HashMap::new(),
      schema_validator: None,
    }
  }

  /// Register a custom assertion handler under a kind name.
  pub fn register_custom(&mut self, name: impl Into<String>, handler: CustomHandler) {
    self.custom.insert(name.into(), handler);
  }

  /// Evaluate all assertions against the final execution context and
  /// per-node output records. One result per assertion, in order; this
  /// method never fails.
  pub fn evaluate(
    &self,
    assertions: &[AssertionDef],
    context: &Map<String, Value>,
    outputs: &[OutputRecord],
  ) -> Vec<AssertionResult> {
    let output_map: HashMap<&str, &OutputRecord> =
      outputs.iter().map(|o| (o.node_id.as_str(), o)).collect();

    assertions
      .iter()
      .enumerate()
      .map(|(i, def)| {
        let assertion_id = def
          .id
          .clone()
          .unwrap_or_else(|| format!("assertion_{i}"));
        let actual = resolve_actual(def, context, &output_map);

        let outcome = match &def.kind {
          AssertionKind::Builtin(kind) => {
            self.evaluate_builtin(*kind, &def.expected, &actual, &def.config)
          }
          AssertionKind::Custom(name) => match self.custom.get(name) {
            Some(handler) => handler(&def.expected, &actual, &def.config),
            None => Ok((false, format!("unknown assertion type: {name}"))),
          },
        };

        let (passed, message) = match outcome {
          Ok(result) => result,
          Err(e) => (false, format!("assertion error: {e}")),
        };

        let mut metadata = Map::new();
        metadata.insert("field".to_string(), Value::String(def.field.clone()));
        if !def.config.is_empty() {
          metadata.insert("config".to_string(), Value::Object(def.config.clone()));
        }

        AssertionResult {
          assertion_id,
          kind: def.kind.clone(),
          target_node: def.target.clone(),
          expected: def.expected.clone(),
          actual,
          passed,
          message,
          evaluated_at: Utc::now(),
          metadata,
        }
      })
      .collect()
  }

  fn evaluate_builtin(
    &self,
    kind: AssertionType,
    expected: &Value,
    actual: &Value,
    config: &Map<String, Value>,
  ) -> Result<(bool, String), String> {
    match kind {
      AssertionType::Equals => Ok((
        actual == expected,
        format!("expected {expected}, got {actual}"),
      )),
      AssertionType::NotEquals => Ok((
        actual != expected,
        format!("expected not equal to {expected}, got {actual}"),
      )),
      AssertionType::Contains => {
        Ok((contains(actual, expected), format!("expected to contain '{}'", flat(expected))))
      }
      AssertionType::NotContains => Ok((
        !contains(actual, expected),
        format!("expected not to contain '{}'", flat(expected)),
      )),
      AssertionType::MatchesRegex => check_regex(expected, actual),
      AssertionType::JsonPath => check_json_path(expected, actual, config),
      AssertionType::Range => check_range(expected, actual),
      AssertionType::GreaterThan => {
        check_numeric_pair(expected, actual, |a, e| a > e, "expected {a} > {e}")
      }
      AssertionType::LessThan => {
        check_numeric_pair(expected, actual, |a, e| a < e, "expected {a} < {e}")
      }
      AssertionType::LatencyUnder => {
        let (value, threshold) = numeric_pair(expected, actual)
          .ok_or_else(|| format!("invalid latency value: {actual}"))?;
        Ok((
          value < threshold,
          format!("latency {value}ms (threshold: {threshold}ms)"),
        ))
      }
      AssertionType::CostUnder => {
        let (value, threshold) = numeric_pair(expected, actual)
          .ok_or_else(|| format!("invalid cost value: {actual}"))?;
        Ok((value < threshold, format!("cost ${value} (threshold: ${threshold})")))
      }
      AssertionType::SchemaValid => self.check_schema_valid(expected, actual),
      AssertionType::SemanticSimilarity => check_semantic_similarity(expected, actual, config),
      AssertionType::Convergence => check_convergence(expected, actual),
      AssertionType::MemoryRecall => check_memory_recall(expected, actual, config),
    }
  }

  fn check_schema_valid(&self, expected: &Value, actual: &Value) -> Result<(bool, String), String> {
    let Some(validator) = &self.schema_validator else {
      return Ok((false, "schema validation capability not available".to_string()));
    };
    match validator.validate(expected, actual) {
      Ok(()) => Ok((true, "schema validation passed".to_string())),
      Err(errors) => Ok((
        false,
        format!("schema validation failed: {}", errors.join("; ")),
      )),
    }
  }
}

/// Resolve the value under test: a dot-path lookup into the context
/// entry keyed by the target node id when present, else indexed output
/// metadata (`latency_ms`, `cost_usd`, or a field of `output_data`).
fn resolve_actual(
  def: &AssertionDef,
  context: &Map<String, Value>,
  output_map: &HashMap<&str, &OutputRecord>,
) -> Value {
  if let Some(node_output) = context.get(&def.target) {
    return match node_output {
      Value::Object(_) => lookup_path(node_output, &def.field).unwrap_or(Value::Null),
      other => other.clone(),
    };
  }
  if let Some(record) = output_map.get(def.target.as_str()) {
    return match def.field.as_str() {
      "latency_ms" => Value::from(record.latency_ms),
      "cost_usd" => Value::from(record.cost_usd),
      field => lookup_path(&Value::Object(record.output_data.clone()), field)
        .unwrap_or(Value::Null),
    };
  }
  Value::Null
}

/// Walk a dot-separated path through objects and (index-addressed) arrays.
fn lookup_path(value: &Value, path: &str) -> Option<Value> {
  let mut current = value;
  for part in path.split('.') {
    current = match current {
      Value::Object(map) => map.get(part)?,
      Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current.clone())
}

/// Numeric coercion: numbers, booleans, and numeric strings.
fn to_f64(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn numeric_pair(expected: &Value, actual: &Value) -> Option<(f64, f64)> {
  Some((to_f64(actual)?, to_f64(expected)?))
}

/// Render a value without surrounding quotes for use inside messages.
fn flat(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn contains(actual: &Value, expected: &Value) -> bool {
  match actual {
    Value::String(s) => s.contains(&flat(expected)),
    Value::Array(items) => items.contains(expected),
    // Membership on an object checks keys.
    Value::Object(map) => map.contains_key(&flat(expected)),
    _ => false,
  }
}

fn check_regex(expected: &Value, actual: &Value) -> Result<(bool, String), String> {
  let pattern = expected
    .as_str()
    .ok_or_else(|| format!("pattern must be a string, got {expected}"))?;
  let re = regex::Regex::new(pattern).map_err(|e| e.to_string())?;
  let haystack = flat(actual);
  Ok((
    re.is_match(&haystack),
    format!("expected to match pattern '{pattern}'"),
  ))
}

fn check_json_path(
  expected: &Value,
  actual: &Value,
  config: &Map<String, Value>,
) -> Result<(bool, String), String> {
  let path = config
    .get("json_path")
    .and_then(Value::as_str)
    .unwrap_or_default();

  let document = match actual {
    Value::String(s) => serde_json::from_str(s)
      .map_err(|e| format!("JSON path evaluation failed: {e}"))?,
    other => other.clone(),
  };

  let found = lookup_path(&document, path).unwrap_or(Value::Null);
  Ok((
    found == *expected,
    format!("at path '{path}': expected {expected}, got {found}"),
  ))
}

fn check_range(expected: &Value, actual: &Value) -> Result<(bool, String), String> {
  let Some(value) = to_f64(actual) else {
    return Ok((false, format!("cannot compare non-numeric value: {actual}")));
  };
  let min = expected.get("min").and_then(to_f64).unwrap_or(f64::NEG_INFINITY);
  let max = expected.get("max").and_then(to_f64).unwrap_or(f64::INFINITY);
  Ok((
    min <= value && value <= max,
    format!("expected {value} in range [{min}, {max}]"),
  ))
}

fn check_numeric_pair(
  expected: &Value,
  actual: &Value,
  compare: fn(f64, f64) -> bool,
  template: &str,
) -> Result<(bool, String), String> {
  match numeric_pair(expected, actual) {
    Some((a, e)) => {
      let message = template
        .replace("{a}", &a.to_string())
        .replace("{e}", &e.to_string());
      Ok((compare(a, e), message))
    }
    None => Ok((false, format!("cannot compare values: {actual}, {expected}"))),
  }
}

/// Word-set overlap ratio against the expected text. A placeholder
/// heuristic by design, not an embedding metric.
fn check_semantic_similarity(
  expected: &Value,
  actual: &Value,
  config: &Map<String, Value>,
) -> Result<(bool, String), String> {
  let threshold = config.get("threshold").and_then(to_f64).unwrap_or(0.8);
  let expected_text = flat(expected).to_lowercase();
  let actual_text = flat(actual).to_lowercase();

  let expected_words: std::collections::HashSet<&str> =
    expected_text.split_whitespace().collect();
  let actual_words: std::collections::HashSet<&str> = actual_text.split_whitespace().collect();

  let similarity = if expected_words.is_empty() {
    0.0
  } else {
    expected_words.intersection(&actual_words).count() as f64 / expected_words.len() as f64
  };

  Ok((
    similarity >= threshold,
    format!("semantic similarity: {similarity:.2} (threshold: {threshold})"),
  ))
}

/// Convergence over up to `expected.rounds` values: the last two must
/// differ by at most `expected.threshold`.
fn check_convergence(expected: &Value, actual: &Value) -> Result<(bool, String), String> {
  let rounds = expected
    .get("rounds")
    .and_then(Value::as_u64)
    .unwrap_or(10) as usize;
  let threshold = expected.get("threshold").and_then(to_f64).unwrap_or(0.1);

  let Some(items) = actual.as_array() else {
    return Ok((false, "convergence requires a list of negotiation values".to_string()));
  };
  if items.len() < 2 {
    return Ok((false, "insufficient data for convergence check".to_string()));
  }

  let values: Vec<f64> = items
    .iter()
    .take(rounds)
    .map(|v| to_f64(v).ok_or_else(|| format!("non-numeric negotiation value: {v}")))
    .collect::<Result<_, _>>()?;

  if values.len() < 2 {
    return Ok((false, "insufficient data for convergence check".to_string()));
  }
  let final_diff = (values[values.len() - 1] - values[values.len() - 2]).abs();
  Ok((
    final_diff <= threshold,
    format!("convergence diff: {final_diff:.4} (threshold: {threshold})"),
  ))
}

/// Recall of expected items: `|expected ∩ actual| / |expected|`.
fn check_memory_recall(
  expected: &Value,
  actual: &Value,
  config: &Map<String, Value>,
) -> Result<(bool, String), String> {
  let threshold = config.get("threshold").and_then(to_f64).unwrap_or(0.8);

  let expected_items = expected
    .as_array()
    .ok_or_else(|| format!("memory_recall expects a list, got {expected}"))?;
  let actual_items: Vec<Value> = match actual {
    Value::Array(items) => items.clone(),
    other => vec![other.clone()],
  };

  let expected_set: std::collections::HashSet<String> =
    expected_items.iter().map(flat).collect();
  let actual_set: std::collections::HashSet<String> = actual_items.iter().map(|v| flat(v)).collect();

  let recall = if expected_set.is_empty() {
    1.0
  } else {
    expected_set.intersection(&actual_set).count() as f64 / expected_set.len() as f64
  };

  Ok((
    recall >= threshold,
    format!("memory recall: {recall:.2} (threshold: {threshold})"),
  ))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn def(kind: AssertionKind, target: &str, field: &str, expected: Value) -> AssertionDef {
    AssertionDef {
      id: None,
      kind,
      target: target.to_string(),
      field: field.to_string(),
      expected,
      config: Map::new(),
    }
  }

  fn builtin(t: AssertionType, target: &str, field: &str, expected: Value) -> AssertionDef {
    def(AssertionKind::Builtin(t), target, field, expected)
  }

  fn context() -> Map<String, Value> {
    match json!({
      "planner": {"response": "plan is ok", "confidence": 0.9},
      "writer": {"response": "{\"title\": \"Draft\"}"}
    }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  fn outputs() -> Vec<OutputRecord> {
    vec![OutputRecord {
      node_id: "archived".to_string(),
      latency_ms: 120.0,
      cost_usd: 0.004,
      output_data: Map::from_iter([("response".to_string(), json!("archived response"))]),
    }]
  }

  fn evaluate_one(engine: &AssertionEngine, assertion: AssertionDef) -> AssertionResult {
    engine
      .evaluate(&[assertion], &context(), &outputs())
      .into_iter()
      .next()
      .unwrap()
  }

  #[test]
  fn test_equals_and_contains() {
    let engine = AssertionEngine::new();

    let eq = evaluate_one(
      &engine,
      builtin(AssertionType::Equals, "planner", "confidence", json!(0.9)),
    );
    assert!(eq.passed);

    let contains = evaluate_one(
      &engine,
      builtin(AssertionType::Contains, "planner", "response", json!("ok")),
    );
    assert!(contains.passed);

    let not_contains = evaluate_one(
      &engine,
      builtin(AssertionType::NotContains, "planner", "response", json!("bad")),
    );
    assert!(not_contains.passed);
  }

  #[test]
  fn test_regex_and_json_path() {
    let engine = AssertionEngine::new();

    let re = evaluate_one(
      &engine,
      builtin(AssertionType::MatchesRegex, "planner", "response", json!(r"plan\s+is")),
    );
    assert!(re.passed);

    let mut jp = builtin(AssertionType::JsonPath, "writer", "response", json!("Draft"));
    jp.config.insert("json_path".to_string(), json!("title"));
    let result = evaluate_one(&engine, jp);
    assert!(result.passed, "{}", result.message);
  }

  #[test]
  fn test_invalid_regex_becomes_failed_result() {
    let engine = AssertionEngine::new();
    let result = evaluate_one(
      &engine,
      builtin(AssertionType::MatchesRegex, "planner", "response", json!("([unclosed")),
    );
    assert!(!result.passed);
    assert!(result.message.starts_with("assertion error:"));
  }

  #[test]
  fn test_range_and_comparisons() {
    let engine = AssertionEngine::new();

    let range = evaluate_one(
      &engine,
      builtin(
        AssertionType::Range,
        "planner",
        "confidence",
        json!({"min": 0.5, "max": 1.0}),
      ),
    );
    assert!(range.passed);

    let gt = evaluate_one(
      &engine,
      builtin(AssertionType::GreaterThan, "planner", "confidence", json!(0.95)),
    );
    assert!(!gt.passed);

    let non_numeric = evaluate_one(
      &engine,
      builtin(AssertionType::LessThan, "planner", "response", json!(1)),
    );
    assert!(!non_numeric.passed);
    assert!(non_numeric.message.contains("cannot compare"));
  }

  #[test]
  fn test_metadata_lookup_for_latency_and_cost() {
    let engine = AssertionEngine::new();

    let latency = evaluate_one(
      &engine,
      builtin(AssertionType::LatencyUnder, "archived", "latency_ms", json!(500)),
    );
    assert!(latency.passed, "{}", latency.message);

    let cost = evaluate_one(
      &engine,
      builtin(AssertionType::CostUnder, "archived", "cost_usd", json!(0.001)),
    );
    assert!(!cost.passed);
  }

  #[test]
  fn test_semantic_similarity_threshold() {
    let engine = AssertionEngine::new();

    let mut close = builtin(
      AssertionType::SemanticSimilarity,
      "planner",
      "response",
      json!("plan is ok"),
    );
    close.config.insert("threshold".to_string(), json!(0.9));
    assert!(evaluate_one(&engine, close).passed);

    let far = builtin(
      AssertionType::SemanticSimilarity,
      "planner",
      "response",
      json!("entirely different words"),
    );
    assert!(!evaluate_one(&engine, far).passed);
  }

  #[test]
  fn test_convergence() {
    let engine = AssertionEngine::new();
    let mut ctx = context();
    ctx.insert("negotiator".to_string(), json!({"offers": [10.0, 7.0, 6.1, 6.05]}));

    let converged = engine.evaluate(
      &[builtin(
        AssertionType::Convergence,
        "negotiator",
        "offers",
        json!({"rounds": 10, "threshold": 0.1}),
      )],
      &ctx,
      &[],
    );
    assert!(converged[0].passed, "{}", converged[0].message);

    let diverged = engine.evaluate(
      &[builtin(
        AssertionType::Convergence,
        "negotiator",
        "offers",
        json!({"rounds": 2, "threshold": 0.1}),
      )],
      &ctx,
      &[],
    );
    assert!(!diverged[0].passed);
  }

  #[test]
  fn test_memory_recall() {
    let engine = AssertionEngine::new();
    let mut ctx = context();
    ctx.insert("recall".to_string(), json!({"facts": ["a", "b", "c"]}));

    let mut assertion = builtin(
      AssertionType::MemoryRecall,
      "recall",
      "facts",
      json!(["a", "b", "c", "d"]),
    );
    assertion.config.insert("threshold".to_string(), json!(0.7));
    let result = engine.evaluate(&[assertion], &ctx, &[]);
    assert!(result[0].passed, "{}", result[0].message);
  }

  #[test]
  fn test_schema_valid() {
    let engine = AssertionEngine::new();
    let result = evaluate_one(
      &engine,
      builtin(
        AssertionType::SchemaValid,
        "planner",
        "confidence",
        json!({"type": "number"}),
      ),
    );
    assert!(result.passed, "{}", result.message);

    let none = AssertionEngine::without_schema_validator();
    let result = evaluate_one(
      &none,
      builtin(
        AssertionType::SchemaValid,
        "planner",
        "confidence",
        json!({"type": "number"}),
      ),
    );
    assert!(!result.passed);
    assert!(result.message.contains("capability"));
  }

  #[test]
  fn test_unknown_kind_fails_with_message() {
    let engine = AssertionEngine::new();
    let result = evaluate_one(
      &engine,
      def(
        AssertionKind::Custom("tone_check".to_string()),
        "planner",
        "response",
        json!("calm"),
      ),
    );
    assert!(!result.passed);
    assert_eq!(result.message, "unknown assertion type: tone_check");
  }

  #[test]
  fn test_custom_handler_dispatch_and_error_downgrade() {
    let mut engine = AssertionEngine::new();
    engine.register_custom(
      "always_pass",
      Box::new(|_, _, _| Ok((true, "ok".to_string()))),
    );
    engine.register_custom(
      "always_err",
      Box::new(|_, _, _| Err("handler exploded".to_string())),
    );

    let pass = evaluate_one(
      &engine,
      def(
        AssertionKind::Custom("always_pass".to_string()),
        "planner",
        "response",
        json!(null),
      ),
    );
    assert!(pass.passed);

    let err = evaluate_one(
      &engine,
      def(
        AssertionKind::Custom("always_err".to_string()),
        "planner",
        "response",
        json!(null),
      ),
    );
    assert!(!err.passed);
    assert_eq!(err.message, "assertion error: handler exploded");
  }

  #[test]
  fn test_missing_target_resolves_to_null() {
    let engine = AssertionEngine::new();
    let result = evaluate_one(
      &engine,
      builtin(AssertionType::Equals, "nowhere", "response", json!(null)),
    );
    assert!(result.passed);
    assert_eq!(result.actual, Value::Null);
  }

  #[test]
  fn test_generated_ids_are_positional() {
    let engine = AssertionEngine::new();
    let results = engine.evaluate(
      &[
        builtin(AssertionType::Equals, "planner", "confidence", json!(0.9)),
        builtin(AssertionType::Equals, "planner", "confidence", json!(0.9)),
      ],
      &context(),
      &[],
    );
    assert_eq!(results[0].assertion_id, "assertion_0");
    assert_eq!(results[1].assertion_id, "assertion_1");
  }
}
