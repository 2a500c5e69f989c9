//! Best-effort repair of near-JSON caption text
//!
//! Models frequently wrap their answer in Markdown fences, add a sentence of
//! prose around it, leave trailing commas, or run out of output tokens in the
//! middle of a string. [`repair_json`] undoes those specific defects and
//! nothing more; anything else is reported as a malformed response.

use crate::error::CaptionError;
use serde_json::Value;

/// Parse caption text into a JSON object, repairing common defects
pub fn repair_json(text: &str) -> Result<Value, CaptionError> {
    let body = strip_code_fence(text.trim());

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    let start = body.find('{').ok_or_else(|| {
        CaptionError::MalformedResponse(format!("no JSON object in response: {}", preview(text)))
    })?;

    let repaired = rebalance(&body[start..]);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value @ Value::Object(_)) => {
            tracing::debug!("caption JSON needed repair");
            Ok(value)
        }
        Ok(_) => Err(CaptionError::MalformedResponse(
            "response is not a JSON object".to_string(),
        )),
        Err(e) => Err(CaptionError::MalformedResponse(format!(
            "unrepairable caption JSON ({}): {}",
            e,
            preview(text)
        ))),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(open) = s.find("```") else {
        return s;
    };
    let after = &s[open + 3..];
    // Skip the info string (```json)
    let body = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match body.rfind("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Cut the text at the end of the outermost object, or close it if truncated
fn rebalance(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    out.push(c);
                    escaped = true;
                }
                '"' => {
                    out.push(c);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                // Stray closers are dropped
                if stack.last() == Some(&c) {
                    strip_trailing_comma(&mut out);
                    stack.pop();
                    out.push(c);
                    if stack.is_empty() {
                        return out;
                    }
                }
            }
            _ => out.push(c),
        }
    }

    // Truncated output
    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }
    strip_trailing_comma(&mut out);
    if out.trim_end().ends_with(':') {
        out.push_str(" null");
    }
    while let Some(closer) = stack.pop() {
        strip_trailing_comma(&mut out);
        out.push(closer);
    }
    out
}

fn strip_trailing_comma(out: &mut String) {
    let len = out.trim_end().len();
    out.truncate(len);
    if out.ends_with(',') {
        out.pop();
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    let trimmed = text.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
