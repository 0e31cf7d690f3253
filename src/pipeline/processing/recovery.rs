//! Response recovery: turns an untrusted free-form reply into a structured payload.
//!
//! Preference order, first match wins:
//! 1. a fenced block tagged `json` (a bare fence is accepted when its body opens with `[` or `{`)
//! 2. first `[` .. last `]`
//! 3. first `{` .. last `}`
//!
//! When that slice does not parse, later `[`/`{` offsets are tried so that bracketed prose
//! around the payload does not hide it.
//!
//! The recovered text is then parsed strictly. Nothing here retries; that is the
//! orchestrator's job.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Deserializer, Value};

use crate::error::{CanonError, ParseFailureKind, Result};

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?i:json)[^\n]*\n(.*?)```").expect("valid regex"));
static BARE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*\n(.*?)```").expect("valid regex"));

/// A decoded reply: the record elements plus any notes the oracle attached
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub elements: Vec<Value>,
    pub notes: Vec<String>,
}

/// Extracts the substring believed to hold the JSON payload.
pub fn recover_payload(reply: &str) -> Result<&str> {
    if let Some(body) = fenced_body(reply) {
        return Ok(body);
    }
    if let Some(span) = delimited(reply, '[', ']') {
        return Ok(span);
    }
    if let Some(span) = delimited(reply, '{', '}') {
        return Ok(span);
    }
    Err(CanonError::parse(
        ParseFailureKind::NoStructureFound,
        "reply contains no fenced block, array or object",
    ))
}

/// Recovers and strictly parses a reply into record elements.
pub fn decode_reply(reply: &str) -> Result<DecodedPayload> {
    let payload = recover_payload(reply)?;
    let value = match serde_json::from_str::<Value>(payload) {
        Ok(value) => value,
        Err(err) => {
            // `{"rows": [...]}` also contains brackets; give the enclosing object a chance
            // before declaring the payload malformed.
            let enclosing = delimited(reply, '{', '}')
                .filter(|obj| obj.len() > payload.len() && obj.contains(payload))
                .and_then(|obj| serde_json::from_str::<Value>(obj).ok());
            match enclosing.or_else(|| scan_for_payload(reply)) {
                Some(value) => value,
                None => {
                    return Err(CanonError::parse(
                        ParseFailureKind::MalformedPayload,
                        err.to_string(),
                    ))
                }
            }
        }
    };
    into_elements(value)
}

fn fenced_body(reply: &str) -> Option<&str> {
    if let Some(caps) = JSON_FENCE.captures(reply) {
        return caps.get(1).map(|m| m.as_str().trim());
    }
    BARE_FENCE
        .captures_iter(reply)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .find(|body| body.starts_with('[') || body.starts_with('{'))
}

fn delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..end + close.len_utf8()])
}

// Prose may carry brackets of its own (`see [1]`), which spoils the first-to-last slice.
// Every opening delimiter gets a chance, in order; only a record array or a `rows` wrapper counts.
fn scan_for_payload(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .find_map(|(start, _)| {
            let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) if looks_like_payload(&value) => Some(value),
                _ => None,
            }
        })
}

fn looks_like_payload(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(Value::is_object),
        Value::Object(map) => map.contains_key("rows") || map.contains_key("records"),
        _ => false,
    }
}

fn into_elements(value: Value) -> Result<DecodedPayload> {
    match value {
        Value::Array(elements) => Ok(DecodedPayload { elements, notes: Vec::new() }),
        Value::Object(mut map) => {
            let rows = map.remove("rows").or_else(|| map.remove("records"));
            match rows {
                Some(Value::Array(elements)) => {
                    let notes = match map.remove("notes") {
                        Some(Value::Array(items)) => items
                            .into_iter()
                            .map(|n| match n {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect(),
                        Some(Value::String(s)) => vec![s],
                        _ => Vec::new(),
                    };
                    Ok(DecodedPayload { elements, notes })
                }
                Some(_) => Err(CanonError::parse(
                    ParseFailureKind::UnexpectedShape,
                    "`rows` is not an array",
                )),
                // a lone record object
                None if map.contains_key("type") => Ok(DecodedPayload {
                    elements: vec![Value::Object(map)],
                    notes: Vec::new(),
                }),
                None => Err(CanonError::parse(
                    ParseFailureKind::UnexpectedShape,
                    "object carries neither `rows` nor a record",
                )),
            }
        }
        other => Err(CanonError::parse(
            ParseFailureKind::UnexpectedShape,
            format!("top-level value is {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
