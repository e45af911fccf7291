use chrono::Utc;
use serde_json::{Map, Value};
use trellis_config::{ConstraintDef, ContractDef, Severity};

use crate::schema::{JsonSchemaValidator, SchemaValidator};
use crate::violation::{CheckKind, ContractViolation};

/// Validates data contracts between agent nodes.
///
/// Stateless with respect to runs: the same contract and data always
/// yield the same violation list, and no method ever returns an error -
/// an empty list means pass.
pub struct ContractValidator {
  schema_validator: Option<Box<dyn SchemaValidator>>,
}

impl Default for ContractValidator {
  fn default() -> Self {
    Self::new()
  }
}

impl ContractValidator {
  /// Validator with the bundled JSON Schema capability.
  pub fn new() -> Self {
    Self {
      schema_validator: Some(Box::new(JsonSchemaValidator)),
    }
  }

  /// Validator with a caller-supplied schema capability.
  pub fn with_schema_validator(schema_validator: Box<dyn SchemaValidator>) -> Self {
    Self {
      schema_validator: Some(schema_validator),
    }
  }

  /// Validator without the schema capability. Contracts carrying a
  /// schema produce a warning-severity violation instead of being
  /// checked.
  pub fn without_schema_validator() -> Self {
    Self {
      schema_validator: None,
    }
  }

  /// Validate assembled input data against a contract before a node
  /// executes.
  ///
  /// The data under test is the union of the contract's named
  /// `input_sources` drawn from the execution context; when no sources
  /// are named, every context entry is unioned. Non-object context
  /// values are wrapped as `{"value": ...}`.
  pub fn validate_input(
    &self,
    contract: &ContractDef,
    context: &Map<String, Value>,
  ) -> Vec<ContractViolation> {
    let mut data = Map::new();
    let sources: Vec<&str> = if contract.input_sources.is_empty() {
      context.keys().map(String::as_str).collect()
    } else {
      contract.input_sources.iter().map(String::as_str).collect()
    };
    for source in sources {
      match context.get(source) {
        Some(Value::Object(fields)) => data.extend(fields.clone()),
        Some(other) => {
          data.insert("value".to_string(), other.clone());
        }
        None => {}
      }
    }

    self.run_checks(contract, &data)
  }

  /// Validate a node's freshly produced output against a contract.
  pub fn validate_output(
    &self,
    contract: &ContractDef,
    output: &Map<String, Value>,
  ) -> Vec<ContractViolation> {
    self.run_checks(contract, output)
  }

  fn run_checks(&self, contract: &ContractDef, data: &Map<String, Value>) -> Vec<ContractViolation> {
    let mut violations = Vec::new();

    if contract.schema.is_some() {
      violations.extend(self.check_schema(contract, data));
    }
    if !contract.required_fields.is_empty() {
      violations.extend(check_required_fields(contract, data));
    }
    if !contract.types.is_empty() {
      violations.extend(check_types(contract, data));
    }
    if !contract.constraints.is_empty() {
      violations.extend(check_constraints(contract, data));
    }

    violations
  }

  fn check_schema(&self, contract: &ContractDef, data: &Map<String, Value>) -> Vec<ContractViolation> {
    let Some(schema) = &contract.schema else {
      return Vec::new();
    };

    let Some(validator) = &self.schema_validator else {
      return vec![violation(
        contract,
        CheckKind::Schema,
        "*",
        Value::String("schema validation capability".to_string()),
        Value::String("not available".to_string()),
        "schema validation capability not configured".to_string(),
        Severity::Warning,
      )];
    };

    match validator.validate(schema, &Value::Object(data.clone())) {
      Ok(()) => Vec::new(),
      Err(errors) => errors
        .into_iter()
        .map(|message| {
          violation(
            contract,
            CheckKind::Schema,
            "*",
            schema.clone(),
            Value::Object(data.clone()),
            message,
            contract.severity,
          )
        })
        .collect(),
    }
  }
}

fn check_required_fields(contract: &ContractDef, data: &Map<String, Value>) -> Vec<ContractViolation> {
  contract
    .required_fields
    .iter()
    .filter(|name| !data.contains_key(*name))
    .map(|name| {
      violation(
        contract,
        CheckKind::RequiredFields,
        name,
        Value::String("present".to_string()),
        Value::String("missing".to_string()),
        format!("required field '{name}' is missing"),
        contract.severity,
      )
    })
    .collect()
}

fn check_types(contract: &ContractDef, data: &Map<String, Value>) -> Vec<ContractViolation> {
  let mut violations = Vec::new();

  for (field, expected_type) in &contract.types {
    let Some(value) = data.get(field) else {
      continue;
    };
    // Unknown type names are skipped rather than flagged.
    if !matches_type(value, expected_type) {
      violations.push(violation(
        contract,
        CheckKind::TypeCheck,
        field,
        Value::String(expected_type.clone()),
        Value::String(type_name(value).to_string()),
        format!(
          "field '{field}' expected type {expected_type}, got {}",
          type_name(value)
        ),
      contract.severity,
      ));
    }
  }

  violations
}

/// Fixed type-name table: `string, integer, float, number, boolean, list,
/// dict, null` plus common aliases. Names outside the table pass.
fn matches_type(value: &Value, type_name: &str) -> bool {
  match type_name.to_ascii_lowercase().as_str() {
    "string" | "str" => value.is_string(),
    "integer" | "int" => value.is_i64() || value.is_u64(),
    "float" => value.is_f64(),
    "number" => value.is_number(),
    "boolean" | "bool" => value.is_boolean(),
    "list" | "array" => value.is_array(),
    "dict" | "object" => value.is_object(),
    "null" | "none" => value.is_null(),
    _ => true,
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
    Value::Number(_) => "float",
    Value::String(_) => "string",
    Value::Array(_) => "list",
    Value::Object(_) => "dict",
  }
}

fn check_constraints(contract: &ContractDef, data: &Map<String, Value>) -> Vec<ContractViolation> {
  let mut violations = Vec::new();

  for (field, constraint) in &contract.constraints {
    let Some(value) = data.get(field) else {
      continue;
    };
    violations.extend(check_one_constraint(contract, field, constraint, value));
  }

  violations
}

fn check_one_constraint(
  contract: &ContractDef,
  field: &str,
  constraint: &ConstraintDef,
  value: &Value,
) -> Vec<ContractViolation> {
  let mut violations = Vec::new();
  let mut fail = |check: CheckKind, expected: Value, actual: Value, message: String| {
    violations.push(violation(
      contract,
      check,
      field,
      expected,
      actual,
      message,
      contract.severity,
    ));
  };

  if let Some(number) = value.as_f64() {
    if let Some(min) = constraint.min
      && number < min
    {
      fail(
        CheckKind::ValueConstraint,
        Value::String(format!(">= {min}")),
        value.clone(),
        format!("field '{field}' value {number} is below minimum {min}"),
      );
    }
    if let Some(max) = constraint.max
      && number > max
    {
      fail(
        CheckKind::ValueConstraint,
        Value::String(format!("<= {max}")),
        value.clone(),
        format!("field '{field}' value {number} exceeds maximum {max}"),
      );
    }
  }

  let length = match value {
    Value::String(s) => Some(s.chars().count()),
    Value::Array(items) => Some(items.len()),
    _ => None,
  };
  if let Some(length) = length {
    if let Some(min_length) = constraint.min_length
      && length < min_length
    {
      fail(
        CheckKind::ValueConstraint,
        Value::String(format!("length >= {min_length}")),
        Value::from(length),
        format!("field '{field}' length {length} is below minimum {min_length}"),
      );
    }
    if let Some(max_length) = constraint.max_length
      && length > max_length
    {
      fail(
        CheckKind::ValueConstraint,
        Value::String(format!("length <= {max_length}")),
        Value::from(length),
        format!("field '{field}' length {length} exceeds maximum {max_length}"),
      );
    }
  }

  if let Some(one_of) = &constraint.one_of
    && !one_of.contains(value)
  {
    fail(
      CheckKind::ValueConstraint,
      Value::Array(one_of.clone()),
      value.clone(),
      format!("field '{field}' value not in allowed values"),
    );
  }

  if let Some(pattern) = &constraint.pattern
    && let Some(text) = value.as_str()
  {
    // Anchored at the start, matching the usual contract authoring
    // expectation for prefix patterns.
    match regex::Regex::new(&format!("^(?:{pattern})")) {
      Ok(re) => {
        if !re.is_match(text) {
          fail(
            CheckKind::ValueConstraint,
            Value::String(format!("matches pattern {pattern}")),
            value.clone(),
            format!("field '{field}' does not match pattern '{pattern}'"),
          );
        }
      }
      Err(e) => fail(
        CheckKind::ValueConstraint,
        Value::String(format!("matches pattern {pattern}")),
        value.clone(),
        format!("invalid pattern for field '{field}': {e}"),
      ),
    }
  }

  violations
}

fn violation(
  contract: &ContractDef,
  check: CheckKind,
  field: &str,
  expected: Value,
  actual: Value,
  message: String,
  severity: Severity,
) -> ContractViolation {
  ContractViolation {
    contract_id: contract.id.clone(),
    check,
    source_node: contract.source.clone(),
    target_node: contract.target.clone(),
    field: field.to_string(),
    expected,
    actual,
    message,
    severity,
    detected_at: Utc::now(),
  }
}
