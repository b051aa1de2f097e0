//! §4.4 — the cache envelope: a typed wrapper around a cached value plus
//! the RFC 9111 metadata the freshness engine and vary matcher need.

use std::collections::HashMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::directives::CacheControl;

/// The stored wrapper around a cached value. Always round-tripped as a
/// whole by a [`crate::CacheStore`]; never serialized piecewise.
///
/// `__envelope` is a discriminant that lets a backend distinguish an
/// envelope from a legacy raw value that predates this wrapper (spec
/// §4.4); see [`CacheEntry::looks_like_envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    #[serde(rename = "__envelope")]
    envelope_marker: bool,
    /// The post-transform response body.
    pub value: V,
    /// Parsed `Cache-Control` directives.
    pub cache_control: CacheControl,
    /// Response `ETag`, if any.
    pub etag: Option<String>,
    /// Response `Last-Modified`, if any (raw HTTP-date string).
    pub last_modified: Option<String>,
    /// Response `Date`, epoch milliseconds. Falls back to `stored_at` when
    /// the response carried no `Date` header.
    pub response_date: i64,
    /// When this entry entered the cache, epoch milliseconds.
    pub stored_at: i64,
    /// Response `Age` at receipt, seconds, always `>= 0`.
    pub age_header: u64,
    /// Parsed `Expires`, epoch milliseconds. `Some(0)` denotes
    /// already-expired (an unparsable or literal `"0"` `Expires` value).
    pub expires: Option<i64>,
    /// The original response status code. A 304 refresh never changes
    /// this.
    pub status_code: u16,
    /// The raw `Vary` header, if any.
    pub vary_headers: Option<String>,
    /// Request header values captured at store time for the fields named
    /// in `vary_headers`, keyed by lowercased header name.
    pub vary_values: HashMap<String, Option<String>>,
}

impl<V> CacheEntry<V> {
    /// Builds a new entry from a freshly fetched response.
    ///
    /// `now_ms` is the current time; `responseDate` falls back to it when
    /// the response carried no parseable `Date` header (spec §3).
    pub fn create(
        value: V,
        response_headers: &HeaderMap,
        status_code: u16,
        now_ms: i64,
    ) -> Self {
        let cache_control = CacheControl::parse(header_str(
            response_headers,
            "cache-control",
        ));
        let etag =
            header_str(response_headers, "etag").map(str::to_owned);
        let last_modified = header_str(response_headers, "last-modified")
            .map(str::to_owned);
        let response_date = header_str(response_headers, "date")
            .and_then(parse_http_date_ms)
            .unwrap_or(now_ms);
        let age_header = header_str(response_headers, "age")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let expires =
            header_str(response_headers, "expires").map(parse_expires_ms);
        let vary_headers =
            header_str(response_headers, "vary").map(str::to_owned);

        CacheEntry {
            envelope_marker: true,
            value,
            cache_control,
            etag,
            last_modified,
            response_date,
            stored_at: now_ms,
            age_header,
            expires,
            status_code,
            vary_headers,
            vary_values: HashMap::new(),
        }
    }

    /// Applies a 304 response's headers to a stale entry. `value` and
    /// `status_code` are always carried over unchanged; every other
    /// metadata field is overwritten only when the 304 response actually
    /// carried it, otherwise the existing value is kept (spec §4.4, §8
    /// "304 refresh" property).
    #[must_use]
    pub fn refresh_from_304(&self, response_headers: &HeaderMap, now_ms: i64) -> Self
    where
        V: Clone,
    {
        let cache_control = if response_headers.contains_key("cache-control")
        {
            CacheControl::parse(header_str(response_headers, "cache-control"))
        } else {
            self.cache_control
        };
        let etag = header_str(response_headers, "etag")
            .map(str::to_owned)
            .or_else(|| self.etag.clone());
        let last_modified = header_str(response_headers, "last-modified")
            .map(str::to_owned)
            .or_else(|| self.last_modified.clone());
        let response_date = header_str(response_headers, "date")
            .and_then(parse_http_date_ms)
            .unwrap_or(now_ms);
        let age_header = header_str(response_headers, "age")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(self.age_header);
        let expires = header_str(response_headers, "expires")
            .map(parse_expires_ms)
            .or(self.expires);
        let vary_headers = header_str(response_headers, "vary")
            .map(str::to_owned)
            .or_else(|| self.vary_headers.clone());

        CacheEntry {
            envelope_marker: true,
            value: self.value.clone(),
            cache_control,
            etag,
            last_modified,
            response_date,
            stored_at: now_ms,
            age_header,
            expires,
            status_code: self.status_code,
            vary_headers,
            vary_values: self.vary_values.clone(),
        }
    }

    /// Records the request header values a `Vary`-listed field set maps
    /// to, captured at store time.
    pub fn set_vary_values(&mut self, values: HashMap<String, Option<String>>) {
        self.vary_values = values;
    }
}

/// Type guard for a backend that may hold legacy raw (non-enveloped)
/// values alongside [`CacheEntry`]s, e.g. deserialized as
/// `serde_json::Value` before committing to a concrete type.
#[must_use]
pub fn looks_like_envelope(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("__envelope"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_http_date_ms(raw: &str) -> Option<i64> {
    httpdate::parse_http_date(raw)
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
}

/// Parses an `Expires` header value. An unparsable value (including the
/// literal `"0"`, per RFC 9111) is treated as already expired.
fn parse_expires_ms(raw: &str) -> i64 {
    if raw.trim() == "0" {
        return 0;
    }
    parse_http_date_ms(raw).unwrap_or(0)
}
