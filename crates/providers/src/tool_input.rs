//! Finalizing streamed tool arguments.
//!
//! Both protocols deliver tool arguments as JSON text fragments. Fragments
//! are concatenated as they arrive and parsed exactly once, when the call is
//! complete.

use serde_json::{Map, Value};

/// Parse a completed argument buffer into a JSON object.
///
/// An empty buffer, malformed JSON, or a non-object value all yield `{}`;
/// a bad argument string never fails the turn.
pub fn parse_tool_input(buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(buffer) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(kind = json_kind(&other), "Tool input is not an object, using {{}}");
            Value::Object(Map::new())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Malformed tool input, using {{}}");
            Value::Object(Map::new())
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
