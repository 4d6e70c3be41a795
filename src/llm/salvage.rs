//! JSON salvager - extract a JSON value from model output
//!
//! Models asked for JSON frequently wrap it in prose, fences, or produce
//! near-JSON. Four strategies run in order, stopping at the first that
//! parses: direct parse, fenced block, outermost balanced block, and a
//! forgiving-fixes pass. Salvage never fails loudly; callers get `None`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Extract a JSON value from model text, or `None` if nothing parses
pub fn salvage(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Strategy 1: the whole thing is JSON
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // Strategy 2: first fenced block
    if let Some(fenced) = extract_fenced(trimmed)
        && let Ok(value) = serde_json::from_str(fenced.trim())
    {
        debug!("salvage: recovered from fenced block");
        return Some(value);
    }

    // Strategy 3: outermost balanced {...} or [...]
    if let Some(block) = extract_balanced(trimmed)
        && let Ok(value) = serde_json::from_str(block)
    {
        debug!("salvage: recovered from balanced block");
        return Some(value);
    }

    // Strategy 4: forgiving fixes, then re-extract
    let repaired = repair(trimmed);
    if let Some(block) = extract_balanced(&repaired)
        && let Ok(value) = serde_json::from_str(block)
    {
        debug!("salvage: recovered after repair");
        return Some(value);
    }

    debug!(len = trimmed.len(), "salvage: all strategies failed");
    None
}

/// Salvage and deserialize into a concrete type
pub fn salvage_as<T: DeserializeOwned>(text: &str) -> Option<T> {
    salvage(text).and_then(|value| serde_json::from_value(value).ok())
}

/// Contents of the first triple-backtick fence, tolerating a language tag
fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag up to the first newline
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The outermost balanced `{...}` or `[...]`, respecting string escapes
fn extract_balanced(text: &str) -> Option<&str> {
    let open_idx = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[open_idx];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open_idx..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Forgiving fixes: trailing commas dropped; single quotes swapped for
/// double quotes when the text has no double quotes at all
fn repair(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '}' | ']' if !in_string => {
                // Drop a trailing comma before the closer
                while out.ends_with(|c: char| c.is_whitespace()) {
                    out.pop();
                }
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if !out.contains('"') && out.contains('\'') {
        out = out.replace('\'', "\"");
    }
    out
}
