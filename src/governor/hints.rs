//! §4.7 — server-hint header parsing: turns `Retry-After` and the
//! `RateLimit-*` header family into a cooldown duration.

use crate::headers::HeaderSnapshot;
use crate::stores::RateLimitHeaderNames;

/// A parsed server hint, milliseconds until the cooldown should end,
/// relative to `now_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHint {
    pub wait_ms: i64,
}

/// Parses every configured header family from a response and decides
/// whether a cooldown should engage, per spec §4.7.
///
/// Engages when `Retry-After` is present (always), or when a reset value
/// is present AND (`status` is 429/503 OR remaining is `<= 0`).
#[must_use]
pub fn parse(
    headers: &HeaderSnapshot,
    status: u16,
    names: &RateLimitHeaderNames,
    now_ms: i64,
) -> Option<ServerHint> {
    let retry_after = find_first(headers, &names.retry_after_names())
        .and_then(|v| parse_retry_after(&v, now_ms));
    if let Some(wait_ms) = retry_after {
        return Some(ServerHint { wait_ms });
    }

    let remaining = find_first(headers, &names.remaining_names())
        .and_then(|v| v.trim().parse::<i64>().ok());
    let reset = find_first(headers, &names.reset_names())
        .and_then(|v| parse_reset(&v, now_ms))
        .or_else(|| {
            find_first(headers, &names.combined_names())
                .and_then(|v| parse_combined(&v, now_ms))
        });

    if let Some(wait_ms) = reset {
        if matches!(status, 429 | 503) || remaining.is_some_and(|r| r <= 0) {
            return Some(ServerHint { wait_ms });
        }
    }

    None
}

fn find_first(headers: &HeaderSnapshot, names: &[String]) -> Option<String> {
    names.iter().find_map(|name| headers.get(name).map(str::to_owned))
}

/// `Retry-After`: an integer number of seconds, or an HTTP-date.
fn parse_retry_after(raw: &str, now_ms: i64) -> Option<i64> {
    if let Ok(secs) = raw.trim().parse::<i64>() {
        return Some((secs * 1000).max(0));
    }
    httpdate::parse_http_date(raw.trim())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| (d.as_millis() as i64 - now_ms).max(0))
}

/// `RateLimit-Reset` / `X-RateLimit-Reset`: an integer. If strictly greater
/// than `now + 1s` it is an absolute epoch-seconds timestamp; otherwise a
/// relative number of seconds.
fn parse_reset(raw: &str, now_ms: i64) -> Option<i64> {
    let value = raw.trim().parse::<i64>().ok()?;
    if value * 1000 > now_ms + 1_000 {
        Some((value * 1000 - now_ms).max(0))
    } else {
        Some((value * 1000).max(0))
    }
}

/// `RateLimit` combined form: `r=<remaining>, t=<reset-seconds>`.
fn parse_combined(raw: &str, now_ms: i64) -> Option<i64> {
    let mut t = None;
    for part in raw.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("t=") {
            t = value.trim().parse::<i64>().ok();
        }
    }
    t.map(|secs| (secs * 1000).max(0)).map(|ms| ms.min(i64::MAX - now_ms))
}
