//! Strict structured-output decoding
//!
//! A structured response is accepted only if it parses as JSON, validates
//! against the declared schema and deserializes into the target type. Any
//! failure is an [`AgentError::SchemaViolation`]; nothing is defaulted.

use crate::error::{AgentError, AgentResult};
use crate::llm::provider::{JsonSchemaDefinition, ResponseFormat};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A named JSON schema an agent's output must conform to
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    /// Derive a strict schema from a Rust type
    pub fn of<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        let schema = serde_json::to_value(root).unwrap_or_else(|_| Value::Object(Default::default()));
        Self {
            name: T::schema_name(),
            schema: strict_schema(schema),
        }
    }

    /// Wrap a hand-written schema
    pub fn from_value(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema: strict_schema(schema),
        }
    }

    /// Response format asking the server to constrain its output
    pub fn response_format(&self) -> ResponseFormat {
        ResponseFormat::JsonSchema {
            json_schema: JsonSchemaDefinition {
                name: self.name.clone(),
                strict: Some(true),
                schema: self.schema.clone(),
            },
        }
    }

    /// Parse model text and validate it against this schema
    pub fn parse(&self, content: &str) -> AgentResult<Value> {
        let payload = strip_code_fence(content);
        if payload.is_empty() {
            return Err(AgentError::schema_violation(
                &self.name,
                "response was empty",
            ));
        }

        let value: Value = serde_json::from_str(payload).map_err(|e| {
            AgentError::schema_violation(&self.name, format!("response is not valid JSON: {e}"))
        })?;

        self.validate(&value)?;
        Ok(value)
    }

    /// Validate an already-parsed value
    pub fn validate(&self, value: &Value) -> AgentResult<()> {
        let validator = jsonschema::validator_for(&self.schema).map_err(|e| {
            AgentError::schema_violation(&self.name, format!("schema does not compile: {e}"))
        })?;

        validator.validate(value).map_err(|errors| {
            let error_messages: Vec<String> = errors
                .map(|e| format!("at '{}': {}", e.instance_path, e))
                .collect();
            AgentError::schema_violation(&self.name, error_messages.join("; "))
        })
    }
}

/// Types that can be requested as structured model output
pub trait StructuredOutput: DeserializeOwned + JsonSchema + Sized {
    fn output_schema() -> OutputSchema {
        OutputSchema::of::<Self>()
    }

    /// Decode model text into this type, strictly
    fn decode(content: &str) -> AgentResult<Self> {
        let schema = Self::output_schema();
        let value = schema.parse(content)?;
        decode_value(&schema.name, value)
    }
}

impl<T: DeserializeOwned + JsonSchema> StructuredOutput for T {}

/// Deserialize an already validated value
pub fn decode_value<T: DeserializeOwned>(schema_name: &str, value: Value) -> AgentResult<T> {
    serde_json::from_value(value).map_err(|e| AgentError::schema_violation(schema_name, e.to_string()))
}

/// Close the root object and require every declared property
///
/// Optional fields stay nullable through their `type` list, so requiring them
/// only forces the model to state `null` explicitly.
fn strict_schema(mut schema: Value) -> Value {
    if let Some(object) = schema.as_object_mut() {
        let keys: Option<Vec<Value>> = object
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().map(Value::String).collect());

        if let Some(keys) = keys {
            object.insert("required".to_string(), Value::Array(keys));
            object.insert("additionalProperties".to_string(), Value::Bool(false));
        }
    }
    schema
}

/// Remove one surrounding Markdown code fence, if present
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop an info string such as `json`
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}
