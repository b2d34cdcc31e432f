//! Argument validation against a tool's declared JSON schema.
//!
//! Models routinely send `"10"` for an integer or `"true"` for a boolean, so
//! top-level properties are coerced to their declared primitive type and
//! filled from `default` first. The result is then checked against the full
//! schema with `jsonschema`.

use serde_json::{Map, Value};

/// Validate `arguments` against `schema`, returning the coerced argument map.
///
/// `Null` arguments are treated as an empty object. A bare string means the
/// model produced arguments that were not valid JSON.
pub fn validate_arguments(schema: &Value, arguments: Value) -> Result<Value, String> {
    let mut args = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(raw) => return Err(format!("arguments are not valid JSON: {raw}")),
        other => return Err(format!("arguments must be an object, got {}", type_name(&other))),
    };

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, property) in properties {
            match args.remove(key) {
                Some(Value::Null) | None => {
                    if let Some(default) = property.get("default") {
                        args.insert(key.clone(), default.clone());
                    }
                }
                Some(value) => {
                    args.insert(key.clone(), coerce(property, value));
                }
            }
        }
    }

    let args = Value::Object(args);
    let validator = jsonschema::Validator::new(schema).map_err(|e| format!("invalid tool schema: {e}"))?;
    if validator.is_valid(&args) {
        return Ok(args);
    }
    let errors: Vec<String> = validator.iter_errors(&args).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

/// Convert `value` to the property's declared primitive type when that is
/// lossless. Anything else is returned unchanged for the validator to judge.
fn coerce(property: &Value, value: Value) -> Value {
    let Some(expected) = property.get("type").and_then(Value::as_str) else {
        return value;
    };

    match (expected, value) {
        ("boolean", Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        ("integer", Value::Number(n)) => match n.as_f64() {
            Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => Value::Number(n),
        },
        ("integer", Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(s),
        },
        ("number", Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Value::from(f),
            _ => Value::String(s),
        },
        (_, v) => v,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
