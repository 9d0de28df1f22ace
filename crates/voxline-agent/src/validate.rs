//! Pre-dispatch validation of tool arguments against the declared schema.
//!
//! Tools declare a flat JSON-schema object (`type`, `properties`,
//! `required`). Validation covers the checks a voice agent actually needs
//! before touching the backing store: the argument value is an object,
//! every required property is present, and every supplied property matches
//! its declared primitive type. Violations come back as human-readable
//! messages the model can self-correct from.

use serde_json::Value;

/// Validate `arguments` against `schema`. `Ok(())` or the first violation.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(object) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in object {
            let Some(declared) = properties.get(name) else {
                return Err(format!("unknown argument '{name}'"));
            };
            if let Some(expected) = declared.get("type").and_then(Value::as_str) {
                if !matches_type(value, expected) {
                    return Err(format!(
                        "argument '{name}' should be of type {expected}"
                    ));
                }
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown declarations never reject; the handler gets to decide.
        _ => true,
    }
}
