//! Helpers for turning raw model replies into JSON.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").expect("fence regex should be valid")
});

/// Remove surrounding markdown code fencing, if any.
///
/// With several fenced blocks the first one wins. Unfenced text is returned
/// trimmed.
pub fn strip_code_fences(raw: &str) -> &str {
    match FENCE_RE.captures(raw).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim(),
        None => raw.trim(),
    }
}

/// Parse a JSON object out of a model reply, tolerating fencing and prose
/// around the object.
pub fn parse_json_object(raw: &str) -> Result<Value> {
    let body = strip_code_fences(raw);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }
    let start = body
        .find('{')
        .ok_or_else(|| anyhow!("reply contains no JSON object"))?;
    let end = body
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("reply contains an unterminated JSON object"))?;
    let value: Value =
        serde_json::from_str(&body[start..=end]).context("parse JSON object from reply")?;
    if !value.is_object() {
        return Err(anyhow!("reply JSON is not an object"));
    }
    Ok(value)
}
