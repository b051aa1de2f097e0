//! §4.5 — the `Vary` matcher.

use std::collections::HashMap;

use http::HeaderMap;

/// Parses a raw `Vary` header value into a lowercased field set.
fn parse_fields(vary: &str) -> Vec<String> {
    vary.split(',')
        .map(|field| field.trim().to_ascii_lowercase())
        .filter(|field| !field.is_empty())
        .collect()
}

/// True if `vary` contains the wildcard, meaning the entry it describes can
/// never be reused.
#[must_use]
pub fn is_wildcard(vary: &str) -> bool {
    parse_fields(vary).iter().any(|field| field == "*")
}

/// Captures the request header values named by `vary` from `request_headers`,
/// to be stored alongside a cache entry at write time.
///
/// A field absent from `request_headers` is recorded as `None`, distinct
/// from a field present with an empty value.
#[must_use]
pub fn capture(vary: &str, request_headers: &HeaderMap) -> HashMap<String, Option<String>> {
    parse_fields(vary)
        .into_iter()
        .map(|field| {
            let value = request_headers
                .get(&field)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            (field, value)
        })
        .collect()
}

/// Decides whether a stored entry whose `Vary` header was `vary` and whose
/// captured values were `stored_values` still matches `current_headers`.
///
/// A `*` in `vary` always fails the match. Otherwise every named field's
/// captured value must equal the current request's value for that header
/// (case-insensitive lookup); both sides absent counts as a match.
#[must_use]
pub fn matches(
    vary: Option<&str>,
    stored_values: &HashMap<String, Option<String>>,
    current_headers: &HeaderMap,
) -> bool {
    let Some(vary) = vary else {
        return true;
    };
    if is_wildcard(vary) {
        return false;
    }
    parse_fields(vary).iter().all(|field| {
        let stored = stored_values.get(field).cloned().flatten();
        let current = current_headers
            .get(field)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        stored == current
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn wildcard_never_matches() {
        let stored = capture("*", &headers(&[]));
        assert!(!matches(Some("*"), &stored, &headers(&[("accept", "json")])));
    }

    #[test]
    fn absent_vary_always_matches() {
        assert!(matches(None, &HashMap::new(), &headers(&[])));
    }

    #[test]
    fn matching_field_values_match() {
        let original = headers(&[("accept-encoding", "gzip")]);
        let stored = capture("Accept-Encoding", &original);
        let same = headers(&[("accept-encoding", "gzip")]);
        assert!(matches(Some("Accept-Encoding"), &stored, &same));

        let different = headers(&[("accept-encoding", "br")]);
        assert!(!matches(Some("Accept-Encoding"), &stored, &different));
    }

    #[test]
    fn both_absent_is_a_match() {
        let stored = capture("X-Custom", &headers(&[]));
        assert!(matches(Some("X-Custom"), &stored, &headers(&[])));
    }

    #[test]
    fn multiple_fields_all_must_agree() {
        let original = headers(&[("accept", "json"), ("accept-language", "en")]);
        let stored = capture("Accept, Accept-Language", &original);

        let partial_match = headers(&[("accept", "json"), ("accept-language", "fr")]);
        assert!(!matches(Some("Accept, Accept-Language"), &stored, &partial_match));

        let full_match = headers(&[("accept", "json"), ("accept-language", "en")]);
        assert!(matches(Some("Accept, Accept-Language"), &stored, &full_match));
    }
}
