//! §4.3 — the freshness engine. A pure function of an entry's metadata and
//! the current time; no hidden state, no I/O.

use crate::envelope::CacheEntry;

/// Milliseconds-domain age accounting, computed internally to avoid
/// accumulating rounding error across branches; converted to whole seconds
/// only at the comparison/TTL boundary (spec: "Freshness math in integer
/// domain").
struct AgeMs {
    apparent: i64,
    corrected_initial: i64,
    resident: i64,
    current: i64,
}

fn age_ms<V>(entry: &CacheEntry<V>, now_ms: i64) -> AgeMs {
    let apparent = (entry.stored_at - entry.response_date).max(0);
    let corrected_initial = apparent.max(i64::try_from(entry.age_header).unwrap_or(0) * 1000);
    let resident = (now_ms - entry.stored_at).max(0);
    let current = corrected_initial + resident;
    AgeMs { apparent, corrected_initial, resident, current }
}

/// The current age of an entry, in whole seconds.
#[must_use]
pub fn current_age_secs<V>(entry: &CacheEntry<V>, now_ms: i64) -> i64 {
    age_ms(entry, now_ms).current / 1000
}

/// The apparent age of an entry, in whole seconds.
#[must_use]
pub fn apparent_age_secs<V>(entry: &CacheEntry<V>, now_ms: i64) -> i64 {
    age_ms(entry, now_ms).apparent / 1000
}

/// The corrected initial age of an entry, in whole seconds.
#[must_use]
pub fn corrected_initial_age_secs<V>(entry: &CacheEntry<V>, now_ms: i64) -> i64 {
    age_ms(entry, now_ms).corrected_initial / 1000
}

/// How long an entry has resided in the cache, in whole seconds.
#[must_use]
pub fn resident_time_secs<V>(entry: &CacheEntry<V>, now_ms: i64) -> i64 {
    age_ms(entry, now_ms).resident / 1000
}

/// Computes the freshness lifetime of an entry, in seconds, following the
/// private-cache priority order of spec §4.3. `s-maxage` is intentionally
/// never consulted.
#[must_use]
pub fn freshness_lifetime_secs<V>(entry: &CacheEntry<V>) -> i64 {
    if let Some(max_age) = entry.cache_control.max_age {
        return max_age;
    }
    if let Some(expires) = entry.expires {
        return ((expires - entry.response_date) / 1000).max(0);
    }
    if let Some(last_modified) = entry
        .last_modified
        .as_deref()
        .and_then(httpdate::parse_http_date)
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
    {
        if last_modified < entry.response_date {
            return ((entry.response_date - last_modified) / 1000) / 10;
        }
    }
    0
}

/// A freshness classification, per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Fresh,
    Stale,
    NoCache,
    MustRevalidate,
    StaleWhileRevalidate,
    StaleIfError,
}

/// Classifies an entry's freshness at `now_ms`.
///
/// Branch order matters and is taken verbatim from spec §4.3: `no-cache`
/// always wins first regardless of age; a fresh entry short-circuits before
/// `must-revalidate` is even consulted; SWR is checked before SIE; an
/// unmatched stale entry with neither window falls through to `stale`.
#[must_use]
pub fn classify<V>(entry: &CacheEntry<V>, now_ms: i64) -> Classification {
    if entry.cache_control.no_cache {
        return Classification::NoCache;
    }

    let lifetime = freshness_lifetime_secs(entry);
    let age = current_age_secs(entry, now_ms);
    let staleness = age - lifetime;

    if lifetime > age {
        return Classification::Fresh;
    }
    if entry.cache_control.must_revalidate {
        return Classification::MustRevalidate;
    }
    if let Some(swr) = entry.cache_control.stale_while_revalidate {
        if staleness <= swr {
            return Classification::StaleWhileRevalidate;
        }
    }
    if let Some(sie) = entry.cache_control.stale_if_error {
        if staleness <= sie {
            return Classification::StaleIfError;
        }
    }
    Classification::Stale
}

/// Computes the TTL to pass to the backing cache store on write, per spec
/// §4.3: `lifetime + max(swr, sie, 0)`, except that an absent `max-age`
/// with a zero lifetime falls back to `default_ttl_secs`. The result is
/// then clamped to `[min_ttl_secs, max_ttl_secs]` when those overrides are
/// supplied.
#[must_use]
pub fn store_ttl_secs<V>(
    entry: &CacheEntry<V>,
    default_ttl_secs: i64,
    min_ttl_secs: Option<i64>,
    max_ttl_secs: Option<i64>,
) -> i64 {
    let lifetime = freshness_lifetime_secs(entry);
    let stale_window = entry
        .cache_control
        .stale_while_revalidate
        .unwrap_or(0)
        .max(entry.cache_control.stale_if_error.unwrap_or(0))
        .max(0);

    let ttl = if entry.cache_control.max_age.is_none() && lifetime == 0 {
        default_ttl_secs
    } else {
        lifetime + stale_window
    };

    let ttl = min_ttl_secs.map_or(ttl, |min| ttl.max(min));
    max_ttl_secs.map_or(ttl, |max| ttl.min(max))
}
