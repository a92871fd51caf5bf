//! Output schema validation for task payloads.
//!
//! Each TaskDefinition declares a JSON Schema for its output; the schema is
//! compiled once at registration and every raw agent payload is checked
//! against it before the output is accepted into run history.

use jsonschema::{Validator, validator_for};
use serde_json::Value;

use crate::error::{CadenceError, Result};

/// A compiled output schema bound to one task.
pub struct OutputSchema {
    raw: Value,
    validator: Validator,
}

impl OutputSchema {
    /// Compile a JSON Schema. Fails on a malformed schema document.
    pub fn compile(schema: Value) -> Result<Self> {
        let validator = validator_for(&schema)
            .map_err(|e| CadenceError::InvalidState(format!("invalid output schema: {}", e)))?;
        Ok(Self {
            raw: schema,
            validator,
        })
    }

    /// The schema document as declared.
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    /// Check a payload, returning every violation as a joined message.
    pub fn check(&self, payload: &Value) -> std::result::Result<(), String> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(payload)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// True if the payload satisfies the schema.
    pub fn is_valid(&self, payload: &Value) -> bool {
        self.validator.is_valid(payload)
    }
}

impl std::fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchema").field("raw", &self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "score": { "type": "number", "minimum": 0, "maximum": 100 },
                "rationale": { "type": "string" }
            },
            "required": ["score"]
        })
    }

    #[test]
    fn test_compile_valid_schema() {
        assert!(OutputSchema::compile(score_schema()).is_ok());
    }

    #[test]
    fn test_compile_malformed_schema_fails() {
        let result = OutputSchema::compile(json!({"type": "not-a-type"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_valid_payload_passes() {
        let schema = OutputSchema::compile(score_schema()).unwrap();
        let payload = json!({"score": 85.0, "rationale": "solid"});
        assert!(schema.check(&payload).is_ok());
        assert!(schema.is_valid(&payload));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let schema = OutputSchema::compile(score_schema()).unwrap();
        let payload = json!({"rationale": "no score here"});
        let err = schema.check(&payload).unwrap_err();
        assert!(err.contains("score"));
    }

    #[test]
    fn test_wrong_type_fails() {
        let schema = OutputSchema::compile(score_schema()).unwrap();
        let payload = json!({"score": "ninety"});
        assert!(schema.check(&payload).is_err());
        assert!(!schema.is_valid(&payload));
    }

    #[test]
    fn test_multiple_violations_are_joined() {
        let schema = OutputSchema::compile(json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "string"}
            },
            "required": ["a", "b"]
        }))
        .unwrap();
        let err = schema.check(&json!({})).unwrap_err();
        assert!(err.contains("a"));
        assert!(err.contains("b"));
    }

    #[test]
    fn test_as_json_returns_declared_schema() {
        let raw = score_schema();
        let schema = OutputSchema::compile(raw.clone()).unwrap();
        assert_eq!(schema.as_json(), &raw);
    }
}
