//! Parameter schemas for agent functions.

use serde_json::{Map, Value, json};

use beeswarm_core::context::CONTEXT_VARIABLES_PARAM;

/// JSON Schema primitive type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: Option<String>,
    pub required: bool,
}

/// Builder for an explicit `{type: object, properties, required}` schema.
#[derive(Debug, Clone, Default)]
pub struct FunctionSchema {
    params: Vec<ParamSpec>,
}

impl FunctionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, ty: ParamType, description: &str) -> Self {
        self.push(name, ty, description, true)
    }

    pub fn optional(self, name: &str, ty: ParamType, description: &str) -> Self {
        self.push(name, ty, description, false)
    }

    fn push(mut self, name: &str, ty: ParamType, description: &str, required: bool) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(ParamSpec {
            name: name.to_string(),
            ty,
            description: (!description.is_empty()).then(|| description.to_string()),
            required,
        });
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn build(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            let mut prop = json!({ "type": p.ty.as_str() });
            if let Some(desc) = &p.description {
                prop["description"] = json!(desc);
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(json!(p.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Schema inferred from bare parameter names: every parameter is a required string.
/// `context_variables` is never exposed.
pub fn schema_from_params(names: &[&str]) -> Value {
    names
        .iter()
        .filter(|n| **n != CONTEXT_VARIABLES_PARAM)
        .fold(FunctionSchema::new(), |schema, name| {
            schema.required(name, ParamType::String, "")
        })
        .build()
}

/// Remove the injected `context_variables` parameter from a schema shown to the model.
pub fn strip_context_param(schema: &Value) -> Value {
    let mut schema = schema.clone();
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        props.remove(CONTEXT_VARIABLES_PARAM);
    }
    if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|r| r.as_str() != Some(CONTEXT_VARIABLES_PARAM));
    }
    schema
}
