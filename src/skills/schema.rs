//! Tool schema synthesis.
//!
//! Tools describe their parameters as a flat list; the JSON schema the
//! model sees is synthesized from default-value types plus a few name
//! heuristics. Two reserved parameter names are injected by the runtime
//! and never appear in the schema.

use serde_json::{json, Value};

/// Parameter names the runtime injects; excluded from schemas and from the
/// required list.
pub const RESERVED_PARAMS: [&str; 2] = ["workspace_dir", "_context"];

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    /// Default value, if the parameter has one. Parameters without a
    /// default are required.
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: &str) -> Self {
        ParamSpec {
            name: name.to_string(),
            default: None,
            description: None,
        }
    }

    pub fn optional(name: &str, default: Value) -> Self {
        ParamSpec {
            name: name.to_string(),
            default: Some(default),
            description: None,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Infer the schema type for one parameter: default-value type first, then
/// name heuristics override.
fn infer_type(param: &ParamSpec) -> &'static str {
    let mut param_type = match &param.default {
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => "integer",
        Some(Value::Array(_)) => "array",
        _ => "string",
    };

    match param.name.as_str() {
        "tasks" => param_type = "array",
        "limit" | "offset" => param_type = "integer",
        "recursive" => param_type = "boolean",
        _ => {}
    }

    param_type
}

/// Build the `parameters` object: properties plus the required list.
pub fn synthesize_parameters(params: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in params {
        if RESERVED_PARAMS.contains(&param.name.as_str()) {
            continue;
        }

        let param_type = infer_type(param);
        let description = match (&param.description, param.name.as_str()) {
            (Some(d), _) => d.clone(),
            (None, "tasks") => "List of tasks".to_string(),
            (None, _) => "Parameter".to_string(),
        };

        let mut prop = json!({
            "type": param_type,
            "description": description,
        });
        if param_type == "array" {
            prop["items"] = json!({"type": "string"});
        }

        properties.insert(param.name.clone(), prop);

        if param.default.is_none() {
            required.push(Value::String(param.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": Value::Array(required),
    })
}

/// Full function-tool definition in the wire format the model expects.
pub fn build_tool_definition(name: &str, doc: Option<&str>, params: &[ParamSpec]) -> Value {
    let description = doc
        .map(|d| d.lines().next().unwrap_or("").trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("Tool {}", name));

    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": synthesize_parameters(params),
        }
    })
}
