//! Validate model-supplied tool arguments against a declared parameter schema.

use serde_json::Value;

/// Validate tool arguments against a parameter schema.
///
/// Checks top-level shape only: arguments must be an object (a missing
/// argument payload counts as empty), required fields must be present, and
/// declared properties must carry the declared primitive type. Integral
/// floats are accepted for `integer` since several services emit `3.0`.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    let empty = serde_json::Map::new();
    let obj = match args {
        Value::Object(obj) => obj,
        Value::Null => &empty,
        other => {
            return Err(format!(
                "expected object arguments, got {}",
                json_type_name(other)
            ))
        }
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in obj {
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "field '{key}' expected type '{expected}', got {}",
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn price_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "price": { "type": "number" },
                "shares": { "type": "integer" },
                "note": { "type": "string" },
            },
            "required": ["price"],
        })
    }

    #[test]
    fn rejects_non_object_arguments() {
        let err = validate_arguments(&json!("buy"), &price_schema()).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn null_arguments_count_as_empty_object() {
        let schema = json!({ "type": "object", "properties": {}, "required": [] });
        assert!(validate_arguments(&Value::Null, &schema).is_ok());
        assert!(validate_arguments(&Value::Null, &price_schema()).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&json!({ "note": "x" }), &price_schema()).unwrap_err();
        assert!(err.contains("missing required field 'price'"));
    }

    #[test]
    fn rejects_wrong_primitive_type() {
        let err = validate_arguments(&json!({ "price": "cheap" }), &price_schema()).unwrap_err();
        assert!(err.contains("field 'price'"));
        assert!(err.contains("expected type 'number'"));
    }

    #[test]
    fn accepts_integral_float_for_integer() {
        let args = json!({ "price": 101.5, "shares": 30.0 });
        assert!(validate_arguments(&args, &price_schema()).is_ok());
        let args = json!({ "price": 101.5, "shares": 30.5 });
        assert!(validate_arguments(&args, &price_schema()).is_err());
    }

    #[test]
    fn ignores_fields_not_declared() {
        let args = json!({ "price": 1, "extra": [1, 2] });
        assert!(validate_arguments(&args, &price_schema()).is_ok());
    }
}
