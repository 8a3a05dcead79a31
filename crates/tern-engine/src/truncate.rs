use serde_json::Value;

pub const DEFAULT_MAX_OUTPUT: usize = 256 * 1024; // 256KB

/// Truncate tool output if it exceeds `max_bytes`.
/// Cuts on a char boundary and appends a marker with the original and kept sizes.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let boundary = floor_boundary(output, max_bytes);
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

/// Apply the byte limit to a JSON tool output. Strings are cut in place;
/// any other value that serializes past the limit is replaced by its
/// truncated serialization.
pub fn truncate_value(output: Value, max_bytes: usize) -> Value {
    match output {
        Value::String(s) if s.len() > max_bytes => Value::String(truncate_output(&s, max_bytes)),
        Value::String(_) | Value::Null | Value::Bool(_) | Value::Number(_) => output,
        other => {
            let rendered = other.to_string();
            if rendered.len() <= max_bytes {
                other
            } else {
                Value::String(truncate_output(&rendered, max_bytes))
            }
        }
    }
}

fn floor_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
