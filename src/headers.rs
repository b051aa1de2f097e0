//! A serializable header snapshot, used anywhere headers need to be stored
//! (cache envelopes, captured `Vary` values, error contexts) rather than
//! carried live as an `http::HeaderMap`.
//!
//! Mirrors the shape of `http-cache`'s `HttpHeaders` type: a lowercase-keyed
//! multi-map that serializes as a plain `HashMap<String, Vec<String>>`.

use std::collections::HashMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// A lowercase-keyed, multi-valued snapshot of a set of HTTP headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSnapshot(HashMap<String, Vec<String>>);

impl HeaderSnapshot {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value recorded for `name`, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value recorded for `name`, case-insensitively.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map_or(&[][..], Vec::as_slice)
    }

    /// True if any value is recorded for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Inserts a value, appending to any existing values for the same name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Captures a single header's value (or absence) under `name`.
    ///
    /// Used by the `Vary` matcher (spec §4.5) to record "no such header"
    /// distinctly from "present but empty."
    #[must_use]
    pub fn capture_one(name: &str, from: &HeaderMap) -> Option<String> {
        from.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
    }
}

impl From<&HeaderMap> for HeaderSnapshot {
    fn from(headers: &HeaderMap) -> Self {
        let mut snapshot = HeaderSnapshot::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                snapshot.append(name.as_str(), value);
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut snapshot = HeaderSnapshot::new();
        snapshot.append("ETag", "\"abc\"");
        assert_eq!(snapshot.get("etag"), Some("\"abc\""));
        assert!(snapshot.contains("ETAG"));
    }

    #[test]
    fn append_preserves_order() {
        let mut snapshot = HeaderSnapshot::new();
        snapshot.append("Set-Cookie", "a=1");
        snapshot.append("set-cookie", "b=2");
        assert_eq!(snapshot.get_all("SET-COOKIE"), ["a=1", "b=2"]);
    }

    #[test]
    fn capture_one_distinguishes_absent() {
        let headers = HeaderMap::new();
        assert_eq!(HeaderSnapshot::capture_one("accept", &headers), None);
    }
}
