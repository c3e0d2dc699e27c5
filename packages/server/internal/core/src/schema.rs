//! Schema collaborator contracts
//!
//! Portals never look inside a schema. They only ask it to validate a value
//! at the transport boundary and carry the descriptors alongside functions and
//! services for documentation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Location of the offending value (e.g. `"email"` or `"items[2].id"`)
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Outcome of [`Schema::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn fail(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    /// Joined error messages
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Value validator supplied by the schema system
pub trait Schema: Send + Sync {
    fn validate(&self, value: &Value) -> ValidationResult;
}

impl<F> Schema for F
where
    F: Fn(&Value) -> ValidationResult + Send + Sync,
{
    fn validate(&self, value: &Value) -> ValidationResult {
        self(value)
    }
}

/// Descriptor of a function: documentation plus optional boundary validators
#[derive(Clone, Default)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub input: Option<Arc<dyn Schema>>,
    pub output: Option<Arc<dyn Schema>>,
}

impl FunctionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, schema: impl Schema + 'static) -> Self {
        self.input = Some(Arc::new(schema));
        self
    }

    pub fn output(mut self, schema: impl Schema + 'static) -> Self {
        self.output = Some(Arc::new(schema));
        self
    }

    /// Validate call parameters; passes when no input schema is set
    pub fn validate_input(&self, value: &Value) -> ValidationResult {
        match &self.input {
            Some(schema) => schema.validate(value),
            None => ValidationResult::ok(),
        }
    }

    /// Validate a call result; passes when no output schema is set
    pub fn validate_output(&self, value: &Value) -> ValidationResult {
        match &self.output {
            Some(schema) => schema.validate(value),
            None => ValidationResult::ok(),
        }
    }
}

impl fmt::Debug for FunctionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSchema")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .finish()
    }
}

/// Descriptor of a service: a named group of method schemas
#[derive(Debug, Clone, Default)]
pub struct ServiceSchema {
    pub name: String,
    pub description: String,
    pub methods: Vec<FunctionSchema>,
}

impl ServiceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a method with no validators
    pub fn method(self, name: impl Into<String>) -> Self {
        self.method_schema(FunctionSchema::new(name))
    }

    /// Declare a method with a full schema
    pub fn method_schema(mut self, schema: FunctionSchema) -> Self {
        self.methods.retain(|m| m.name != schema.name);
        self.methods.push(schema);
        self
    }

    pub fn get_method(&self, name: &str) -> Option<&FunctionSchema> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.get_method(name).is_some()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|m| m.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn require_message(value: &Value) -> ValidationResult {
        if value.get("message").and_then(Value::as_str).is_some() {
            ValidationResult::ok()
        } else {
            ValidationResult::fail(vec![ValidationError::new("message", "required string")])
        }
    }

    #[test]
    fn test_function_schema_validation() {
        let schema = FunctionSchema::new("echo").input(require_message);

        assert!(schema.validate_input(&json!({"message": "hi"})).valid);

        let result = schema.validate_input(&json!({"other": 1}));
        assert!(!result.valid);
        assert_eq!(result.summary(), "message: required string");

        // No output schema: anything passes
        assert!(schema.validate_output(&json!(null)).valid);
    }

    #[test]
    fn test_service_schema_methods() {
        let schema = ServiceSchema::new("Users")
            .method("Get")
            .method("Create")
            .method("Get");

        assert_eq!(schema.method_names(), vec!["Create", "Get"]);
        assert!(schema.has_method("Create"));
        assert!(!schema.has_method("Delete"));
    }

    #[test]
    fn test_validation_result_serialization() {
        let ok = serde_json::to_value(ValidationResult::ok()).unwrap();
        assert_eq!(ok, json!({"valid": true}));

        let failed = ValidationResult::fail(vec![ValidationError::new("a", "bad")]);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["errors"][0]["path"], "a");
    }
}
