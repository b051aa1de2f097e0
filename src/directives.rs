//! §4.2 — the `Cache-Control` directive parser.

use serde::{Deserialize, Serialize};

/// A parsed `Cache-Control` directive record.
///
/// Unknown directives are silently ignored; a malformed numeric value
/// (e.g. `max-age=soon`) leaves the corresponding field `None` rather than
/// defaulting it to zero, per spec §4.2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    /// `no-cache` present.
    pub no_cache: bool,
    /// `no-store` present.
    pub no_store: bool,
    /// `must-revalidate` present.
    pub must_revalidate: bool,
    /// `proxy-revalidate` present.
    pub proxy_revalidate: bool,
    /// `public` present.
    pub public: bool,
    /// `private` present.
    pub private: bool,
    /// `immutable` present.
    pub immutable: bool,
    /// `max-age=<seconds>`.
    pub max_age: Option<i64>,
    /// `s-maxage=<seconds>`. Parsed but never consulted by the freshness
    /// engine (spec §4.3: shared-cache-only, intentionally ignored).
    pub s_maxage: Option<i64>,
    /// `stale-while-revalidate=<seconds>`.
    pub stale_while_revalidate: Option<i64>,
    /// `stale-if-error=<seconds>`.
    pub stale_if_error: Option<i64>,
}

impl CacheControl {
    /// Parses a raw `Cache-Control` header value. Absent or empty input
    /// yields a zeroed record.
    #[must_use]
    pub fn parse(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Self::default();
        };
        let mut cc = Self::default();
        for token in header.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (name, value) = match token.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim())),
                None => (token, None),
            };
            apply_directive(&mut cc, &name.to_ascii_lowercase(), value);
        }
        cc
    }
}

fn apply_directive(cc: &mut CacheControl, name: &str, value: Option<&str>) {
    fn parse_i64(value: Option<&str>) -> Option<i64> {
        value?.trim_matches('"').parse::<i64>().ok()
    }

    match name {
        "no-cache" => cc.no_cache = true,
        "no-store" => cc.no_store = true,
        "must-revalidate" => cc.must_revalidate = true,
        "proxy-revalidate" => cc.proxy_revalidate = true,
        "public" => cc.public = true,
        "private" => cc.private = true,
        "immutable" => cc.immutable = true,
        "max-age" => cc.max_age = parse_i64(value),
        "s-maxage" => cc.s_maxage = parse_i64(value),
        "stale-while-revalidate" => {
            cc.stale_while_revalidate = parse_i64(value);
        }
        "stale-if-error" => cc.stale_if_error = parse_i64(value),
        // Unrecognized directive: ignored per spec §4.2.
        _ => {}
    }
}
