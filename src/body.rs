//! §6 — content negotiation and empty-body handling for response payloads.

use serde::{Deserialize, Serialize};

/// The parsed shape of a response body once content negotiation has run.
///
/// A concrete enum rather than a generic type parameter: the store and
/// transport capability traits need to be object-safe (spec §9,
/// "pluggable stores via capability interfaces"), which rules out generic
/// methods, so the cache/dedup/rate-limit boundary standardizes on this
/// type instead of a caller-supplied `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseValue {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

impl ResponseValue {
    /// A short diagnostic label, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseValue::Json(_) => "json",
            ResponseValue::Text(_) => "text",
            ResponseValue::Empty => "empty",
        }
    }
}

/// Parses a response body per spec §6.
///
/// - Status 204/205, or an empty body, yields [`ResponseValue::Empty`].
/// - A `Content-Type` containing `application/json` or ending in `+json`,
///   or a body that begins (after leading whitespace) with `{` or `[`,
///   attempts a JSON parse; on failure the raw text is returned instead of
///   propagating the parse error.
/// - Anything else is returned as raw text.
#[must_use]
pub fn parse(status: u16, content_type: Option<&str>, body: &str) -> ResponseValue {
    if status == 204 || status == 205 || body.is_empty() {
        return ResponseValue::Empty;
    }

    let content_type_says_json = content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("+json")
        })
        .unwrap_or(false);
    let looks_like_json = matches!(body.trim_start().chars().next(), Some('{') | Some('['));

    if content_type_says_json || looks_like_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            return ResponseValue::Json(value);
        }
    }

    ResponseValue::Text(body.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_204_and_205_are_empty_regardless_of_body() {
        assert_eq!(parse(204, None, "{\"a\":1}"), ResponseValue::Empty);
        assert_eq!(parse(205, None, "ignored"), ResponseValue::Empty);
    }

    #[test]
    fn empty_body_is_empty() {
        assert_eq!(parse(200, Some("application/json"), ""), ResponseValue::Empty);
    }

    #[test]
    fn json_content_type_parses() {
        let value = parse(200, Some("application/json; charset=utf-8"), "{\"a\":1}");
        assert_eq!(value, ResponseValue::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn plus_json_suffix_parses() {
        let value = parse(200, Some("application/vnd.api+json"), "[1,2,3]");
        assert_eq!(value, ResponseValue::Json(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn sniffs_json_without_content_type() {
        let value = parse(200, None, "  {\"a\":1}");
        assert_eq!(value, ResponseValue::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn malformed_json_falls_back_to_text() {
        let value = parse(200, Some("application/json"), "{not valid json");
        assert_eq!(value, ResponseValue::Text("{not valid json".to_string()));
    }

    #[test]
    fn plain_text_stays_text() {
        let value = parse(200, Some("text/plain"), "hello");
        assert_eq!(value, ResponseValue::Text("hello".to_string()));
    }
}
