//! Recovery of a JSON object from unreliable model output.
//!
//! Models asked to "answer in JSON" often wrap the object in prose or code
//! fences. [`extract_json_object`] tries, in order:
//!
//! 1. a strict parse of the whole (trimmed) text;
//! 2. a brace-matching scan from the first `{` to its matching `}`,
//!    aware of string literals and escapes;
//! 3. the greedy span from the first `{` to the last `}`.
//!
//! Anything else is reported as [`Extracted::Unparseable`] so the caller
//! decides between a fallback and a failure.

use serde_json::{Map, Value};

/// Upper bound on bytes examined by the brace-matching scan.
const MAX_SCAN_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// The whole text was a JSON object.
    Whole(Map<String, Value>),
    /// An object was found inside surrounding text starting at byte `offset`.
    Embedded {
        object: Map<String, Value>,
        offset: usize,
    },
    /// No object could be recovered; carries the raw text.
    Unparseable(String),
}

impl Extracted {
    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            Extracted::Whole(object) | Extracted::Embedded { object, .. } => Some(object),
            Extracted::Unparseable(_) => None,
        }
    }
}

pub fn extract_json_object(text: &str) -> Extracted {
    if let Some(object) = parse_object(text.trim()) {
        return Extracted::Whole(object);
    }

    let Some(start) = text.find('{') else {
        return Extracted::Unparseable(text.to_string());
    };

    if let Some(end) = matching_brace(text, start) {
        if let Some(object) = parse_object(&text[start..=end]) {
            return Extracted::Embedded {
                object,
                offset: start,
            };
        }
    }

    if let Some(end) = text.rfind('}') {
        if end > start {
            if let Some(object) = parse_object(&text[start..=end]) {
                return Extracted::Embedded {
                    object,
                    offset: start,
                };
            }
        }
    }

    Extracted::Unparseable(text.to_string())
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte index of the `}` closing the `{` at `start`, if any within the scan bound.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let limit = bytes.len().min(start.saturating_add(MAX_SCAN_BYTES));
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().take(limit).skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
