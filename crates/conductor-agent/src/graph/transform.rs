use serde_json::Value;

/// Placeholder replaced with the JSON-serialized node input.
pub const INPUT_TOKEN: &str = "{{ $input }}";

/// Apply an `input`/`output` node transform.
///
/// Without an expression the value passes through. Otherwise every
/// `{{ $input }}` is replaced by the JSON text of `input`, and the result is
/// parsed back as JSON when it is valid JSON, else kept as a string.
pub fn apply_transform(expression: Option<&str>, input: &Value) -> Value {
    let Some(expression) = expression else {
        return input.clone();
    };
    let serialized = serde_json::to_string(input).unwrap_or_default();
    let rendered = expression.replace(INPUT_TOKEN, &serialized);
    serde_json::from_str(&rendered).unwrap_or(Value::String(rendered))
}

/// Human-readable text for a value: strings verbatim, everything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
