//! JSON decoding that reports where in the document a mismatch happened.

use anyhow::Result;

/// Decode `body` into `T`, naming the failing path and showing a snippet of the offending line.
pub fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let message = raw
            .strip_suffix(&format!(" at line {line} column {column}"))
            .unwrap_or(&raw);
        let message = describe_mismatch(message);

        let location = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("at '{path}': ")
        };
        anyhow::anyhow!(
            "{location}{message} (line {line} col {column})\n{}",
            snippet(body, line, column, 24)
        )
    })
}

/// Rewrites serde's "invalid type: X, expected Y" into "expected Y, got X".
fn describe_mismatch(message: &str) -> String {
    message
        .strip_prefix("invalid type: ")
        .and_then(|rest| rest.split_once(", expected "))
        .map(|(actual, expected)| format!("expected {expected}, got {actual}"))
        .unwrap_or_else(|| message.to_string())
}

fn snippet(body: &str, line: usize, column: usize, width: usize) -> String {
    let text = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if text.is_empty() {
        return "(empty line)".to_string();
    }

    let at = column.saturating_sub(1).min(text.len());
    let mut start = at.saturating_sub(width / 2);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (at + width / 2).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }

    let marker = " ".repeat(at - start) + "^";
    format!("...{}...\n   {marker}", &text[start..end])
}
