//! Recovery stages for JSON replies that fail the primary parse.
//!
//! Each stage is a pure text transformation. The caller in
//! [`super::decode`] tries them in order and records which one succeeded.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// `"field": ```lang\n...```` with an optional language tag.
static FENCED_FIELD_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""([A-Za-z_][\w-]*)"\s*:\s*```[\w+.-]*[ \t]*\r?\n?((?s:.*?))```"#).ok());

/// `"field": `...`` single-backtick values.
static BACKTICK_FIELD_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""([A-Za-z_][\w-]*)"\s*:\s*`([^`]*)`"#).ok());

/// Parse `text` as a JSON object; anything else is a failed stage.
pub fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Top-level balanced `{...}` slices of `text`, in order of appearance.
///
/// The scan is string- and escape-aware so braces inside JSON strings do not
/// unbalance it.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                {
                    found.push(&text[s..=i]);
                }
            }
            _ => {}
        }
    }
    found
}

/// First balanced object that parses as a JSON object.
pub fn first_balanced_object(text: &str) -> Option<Value> {
    balanced_objects(text).into_iter().find_map(parse_object)
}

/// Rewrite backtick-fenced field values into JSON strings.
///
/// Returns `None` when nothing was rewritten.
pub fn rewrite_fenced_fields(text: &str) -> Option<String> {
    let fenced = FENCED_FIELD_RE.as_ref()?;
    let backtick = BACKTICK_FIELD_RE.as_ref()?;
    let to_json_field = |caps: &Captures| {
        let value = Value::String(caps[2].to_string());
        format!("\"{}\": {}", &caps[1], value)
    };
    let once = fenced.replace_all(text, to_json_field);
    let twice = backtick.replace_all(&once, to_json_field).into_owned();
    (twice != text).then_some(twice)
}

/// Leading prose before any JSON object or code fence, wrapped as a `chat` value.
pub fn prose_fallback(text: &str) -> Option<Value> {
    let cut = [text.find('{'), text.find("```")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());
    let prose = text[..cut].trim();
    if prose.is_empty() {
        return None;
    }
    let mut fields = Map::new();
    fields.insert("action".to_string(), Value::String("chat".to_string()));
    fields.insert("message".to_string(), Value::String(prose.to_string()));
    Some(Value::Object(fields))
}
