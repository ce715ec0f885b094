use serde_json::Value;

/// Text stored for a scalar JSON value, `None` for null, arrays and objects.
pub fn scalar_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Best-effort inverse of [`scalar_to_text`] for rows loaded back from the store.
/// Text that [`scalar_to_text`] would have produced for a number or boolean
/// comes back typed, everything else as the exact stored string.
pub fn text_to_scalar(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) if value.to_string() == text => value,
        _ => Value::String(text.to_owned()),
    }
}
