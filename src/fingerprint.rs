//! §4.1 — the request fingerprinter.
//!
//! Produces a stable 256-bit hex digest over a request URL's origin, path,
//! and normalized query parameters. Used as the cache key and the dedup
//! key, so two requests that are "the same" for caching purposes must
//! fingerprint identically regardless of query-parameter order, and two
//! requests that differ in origin or in the multiset of repeated
//! query-parameter values must not collide.

use url::Url;

/// Computes the fingerprint of `url`.
///
/// Query parameters are grouped by key (key order does not affect the
/// result) but the ordered sequence of values for a repeated key is
/// preserved, so `tag=a&tag=b` differs from `tag=b&tag=a`. A bare flag
/// (`?foo`, no `=`) is recorded as a present key with no value, distinct
/// from the key being entirely absent.
#[must_use]
pub fn fingerprint(url: &Url) -> String {
    let mut canonical = String::new();
    canonical.push_str(url.scheme());
    canonical.push_str("://");
    canonical.push_str(url.host_str().unwrap_or(""));
    if let Some(port) = url.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    canonical.push_str(url.path());
    canonical.push('\n');

    for (key, values) in normalized_query(url) {
        canonical.push_str(&key);
        canonical.push('=');
        for value in values {
            match value {
                Some(v) => canonical.push_str(&v),
                None => canonical.push_str("\u{0}null\u{0}"),
            }
            canonical.push('\u{1}');
        }
        canonical.push('\n');
    }

    let digest = blake3::hash(canonical.as_bytes());
    hex::encode(digest.as_bytes())
}

/// Groups `url`'s raw query string by key, preserving within-key order and
/// distinguishing a valueless flag (`None`) from an empty value
/// (`Some("")`). Keys are returned sorted so the fingerprint is
/// order-independent.
fn normalized_query(url: &Url) -> Vec<(String, Vec<Option<String>>)> {
    let mut grouped: Vec<(String, Vec<Option<String>>)> = Vec::new();
    let Some(query) = url.query() else {
        return grouped;
    };
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (decode(k), Some(decode(v))),
            None => (decode(pair), None),
        };
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => grouped.push((key, vec![value])),
        }
    }
    grouped.sort_by(|a, b| a.0.cmp(&b.0));
    grouped
}

/// Percent-decodes a single already-split query key or value, treating
/// `+` as a literal space per `application/x-www-form-urlencoded`.
///
/// Deliberately does not use `url::form_urlencoded::parse` here: that
/// function re-splits its input on `&` and `=`, which would corrupt a
/// value that legitimately contains an already-percent-encoded `=`.
fn decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 3 <= bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn determinism_under_key_reordering() {
        let a = fingerprint(&url("https://api.example.com/x?a=1&b=2"));
        let b = fingerprint(&url("https://api.example.com/x?b=2&a=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_origin_differs() {
        let a = fingerprint(&url("https://api.example.com/x?a=1"));
        let b = fingerprint(&url("https://other.example.com/x?a=1"));
        assert_ne!(a, b);
    }

    #[test]
    fn repeated_key_order_matters() {
        let a = fingerprint(&url("https://api.example.com/x?tag=a&tag=b"));
        let b = fingerprint(&url("https://api.example.com/x?tag=b&tag=a"));
        let c = fingerprint(&url(
            "https://api.example.com/x?tag=a&tag=b&tag=c",
        ));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bare_flag_differs_from_empty_value() {
        let a = fingerprint(&url("https://api.example.com/x?flag"));
        let b = fingerprint(&url("https://api.example.com/x?flag="));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_64_hex_chars() {
        let digest = fingerprint(&url("https://api.example.com/x"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
