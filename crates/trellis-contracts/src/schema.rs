use serde_json::Value;

/// JSON Schema validation capability.
///
/// The contract validator consumes this seam rather than a concrete
/// library so deployments can swap implementations (or omit the
/// capability entirely, downgrading schema checks to warnings).
pub trait SchemaValidator: Send + Sync {
  /// Validate `data` against `schema`.
  ///
  /// `Ok(())` means the document conforms; `Err` carries one message per
  /// schema error. An uncompilable schema is itself an error.
  fn validate(&self, schema: &Value, data: &Value) -> Result<(), Vec<String>>;
}

/// [`SchemaValidator`] backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
  fn validate(&self, schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let compiled = match jsonschema::JSONSchema::compile(schema) {
      Ok(compiled) => compiled,
      Err(e) => return Err(vec![format!("invalid schema: {e}")]),
    };
    match compiled.validate(data) {
      Ok(()) => Ok(()),
      Err(errors) => Err(errors.map(|e| e.to_string()).collect()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_conforming_document_passes() {
    let schema = json!({"type": "object", "required": ["id"]});
    let data = json!({"id": 7});
    assert!(JsonSchemaValidator.validate(&schema, &data).is_ok());
  }

  #[test]
  fn test_nonconforming_document_reports_errors() {
    let schema = json!({"type": "object", "required": ["id"]});
    let data = json!({"name": "x"});
    let errors = JsonSchemaValidator.validate(&schema, &data).unwrap_err();
    assert!(!errors.is_empty());
  }

  #[test]
  fn test_bad_schema_is_an_error() {
    let schema = json!({"type": 42});
    let errors = JsonSchemaValidator.validate(&schema, &json!({})).unwrap_err();
    assert!(errors[0].contains("invalid schema"));
  }
}
