//! §6 — external interfaces: the capability traits the orchestrator holds
//! optional references to, plus the request/response shapes that cross
//! them.
//!
//! Narrow capability sets rather than one god-trait, exposed as explicit
//! interface types the client holds by `Arc<dyn ...>` (spec §9, "pluggable
//! stores via capability interfaces"): the core owns no process-wide
//! singletons and never assumes a particular backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capacity::Priority;
use crate::envelope::CacheEntry;
use crate::error::StoreError;
use crate::headers::HeaderSnapshot;

/// A cancellation signal threaded through every suspension point (spec §5).
/// Backed by [`tokio::sync::Notify`] rather than a cooperative polling flag
/// so a wait can be interrupted immediately rather than at its next poll.
#[derive(Clone)]
pub struct AbortSignal {
    notify: Arc<tokio::sync::Notify>,
    fired: Arc<std::sync::atomic::AtomicBool>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self {
            notify: Arc::new(tokio::sync::Notify::new()),
            fired: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Idempotent.
    pub fn abort(&self) {
        self.fired.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.fired.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves when the signal fires. Returns immediately if it has
    /// already fired.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        self.notify.notified().await;
    }

    /// Sleeps for `duration`, but resolves early with `Err(())` if the
    /// signal fires first.
    pub async fn sleep_or_abort(&self, duration: Duration) -> std::result::Result<(), ()> {
        if self.is_aborted() {
            return Err(());
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.aborted() => Err(()),
        }
    }
}

/// A per-request cumulative wait budget, enforced across server-cooldown
/// and rate-limit admission waits combined (spec §5, `maxWaitTime`).
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    remaining_ms: i64,
}

impl Budget {
    #[must_use]
    pub fn new(max_wait_time_ms: i64) -> Self {
        Self { remaining_ms: max_wait_time_ms }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self { remaining_ms: i64::MAX }
    }

    #[must_use]
    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining_ms <= 0
    }

    /// Deducts an elapsed duration, saturating at zero.
    pub fn spend(&mut self, spent_ms: i64) {
        self.remaining_ms = (self.remaining_ms - spent_ms).max(0);
    }
}

/// An outbound request, as seen by a [`Transport`].
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: url::Url,
    pub headers: HeaderSnapshot,
    pub signal: AbortSignal,
}

/// An inbound response, as produced by a [`Transport`].
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: HeaderSnapshot,
    pub body: String,
}

/// A single operation swappable for a concrete HTTP client. Pre-request and
/// post-response interceptor hooks run on every attempt, including
/// background revalidation (spec §6).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch(&self, request: OutboundRequest) -> crate::error::Result<InboundResponse>;
}

/// Cache-override options, mergeable per request over construction-time
/// defaults (spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOverrides {
    pub ignore_no_store: bool,
    pub ignore_no_cache: bool,
    pub minimum_ttl: Option<i64>,
    pub maximum_ttl: Option<i64>,
}

impl CacheOverrides {
    /// Merges `self` (per-request) over `base` (construction-time
    /// defaults): a `true`/`Some` in `self` wins, otherwise `base`'s value
    /// is kept.
    #[must_use]
    pub fn merge_over(&self, base: &CacheOverrides) -> CacheOverrides {
        CacheOverrides {
            ignore_no_store: self.ignore_no_store || base.ignore_no_store,
            ignore_no_cache: self.ignore_no_cache || base.ignore_no_cache,
            minimum_ttl: self.minimum_ttl.or(base.minimum_ttl),
            maximum_ttl: self.maximum_ttl.or(base.maximum_ttl),
        }
    }
}

/// Keyed by fingerprint (spec §6). `ttl_seconds > 0` expires after N
/// seconds, `== 0` never expires, `< 0` is already expired.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> std::result::Result<Option<CacheEntry<crate::body::ResponseValue>>, StoreError>;

    async fn set(
        &self,
        key: &str,
        entry: CacheEntry<crate::body::ResponseValue>,
        ttl_seconds: i64,
    ) -> std::result::Result<(), StoreError>;

    async fn delete(&self, key: &str) -> std::result::Result<(), StoreError>;

    async fn clear(&self) -> std::result::Result<(), StoreError>;
}

/// The outcome of [`DedupStore::register_or_join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub job_id: u64,
    pub is_owner: bool,
}

/// Single-flight coordination keyed by fingerprint (spec §4.8, §6). A
/// failed job resolves `wait_for` to `Ok(None)` for every joiner — the core
/// never retries a joiner as a new owner (spec §9 open question; resolved
/// against re-contention, see DESIGN.md).
#[async_trait]
pub trait DedupStore: Send + Sync + 'static {
    /// Resolves when the job for `key` completes or fails, or immediately
    /// with `None` if there is no job in progress.
    async fn wait_for(
        &self,
        key: &str,
    ) -> std::result::Result<Option<crate::body::ResponseValue>, StoreError>;

    /// Atomically creates the job for `key` if absent, returning whether
    /// the caller is the owner.
    async fn register_or_join(
        &self,
        key: &str,
    ) -> std::result::Result<Registration, StoreError>;

    /// Non-atomic fallback when `register_or_join` is unavailable.
    async fn register(&self, key: &str) -> std::result::Result<(), StoreError>;

    /// Idempotent: a second `complete` for the same key is a no-op.
    async fn complete(
        &self,
        key: &str,
        value: crate::body::ResponseValue,
    ) -> std::result::Result<(), StoreError>;

    async fn fail(&self, key: &str, error: &str) -> std::result::Result<(), StoreError>;

    async fn is_in_progress(&self, key: &str) -> std::result::Result<bool, StoreError>;
}

/// `{remaining, resetTime, limit, adaptive?}` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct RateStatus {
    pub remaining: u32,
    pub reset_time_ms: i64,
    pub limit: u32,
    pub adaptive: Option<crate::capacity::CapacityAllocation>,
}

/// Admission control keyed by logical resource and [`Priority`] (defaults
/// to `background`). Basic stores may ignore priority entirely (spec §6).
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    async fn can_proceed(
        &self,
        resource: &str,
        priority: Priority,
    ) -> std::result::Result<bool, StoreError>;

    /// Atomic check-and-record. `Some(true)` means the slot was recorded
    /// and the orchestrator must not call `record` again; `None` means the
    /// store does not support atomic acquisition and the orchestrator must
    /// fall back to `can_proceed` + `record`.
    async fn acquire(
        &self,
        _resource: &str,
        _priority: Priority,
    ) -> std::result::Result<Option<bool>, StoreError> {
        Ok(None)
    }

    async fn record(
        &self,
        resource: &str,
        priority: Priority,
    ) -> std::result::Result<(), StoreError>;

    async fn get_wait_time(
        &self,
        resource: &str,
        priority: Priority,
    ) -> std::result::Result<Option<Duration>, StoreError>;

    async fn get_status(
        &self,
        resource: &str,
    ) -> std::result::Result<RateStatus, StoreError>;
}

/// User-supplied header-family name lists for rate-limit hint parsing
/// (spec §6). User-supplied names are prepended to the defaults.
#[derive(Debug, Clone, Default)]
pub struct RateLimitHeaderNames {
    pub retry_after: Vec<String>,
    pub limit: Vec<String>,
    pub remaining: Vec<String>,
    pub reset: Vec<String>,
    pub combined: Vec<String>,
}

impl RateLimitHeaderNames {
    #[must_use]
    pub fn retry_after_names(&self) -> Vec<String> {
        prepend_defaults(&self.retry_after, &["retry-after"])
    }

    #[must_use]
    pub fn reset_names(&self) -> Vec<String> {
        prepend_defaults(&self.reset, &["ratelimit-reset", "x-ratelimit-reset"])
    }

    #[must_use]
    pub fn remaining_names(&self) -> Vec<String> {
        prepend_defaults(&self.remaining, &["ratelimit-remaining"])
    }

    #[must_use]
    pub fn limit_names(&self) -> Vec<String> {
        prepend_defaults(&self.limit, &["ratelimit-limit"])
    }

    #[must_use]
    pub fn combined_names(&self) -> Vec<String> {
        prepend_defaults(&self.combined, &["ratelimit"])
    }
}

fn prepend_defaults(user: &[String], defaults: &[&str]) -> Vec<String> {
    user.iter()
        .map(|s| s.to_ascii_lowercase())
        .chain(defaults.iter().map(|s| (*s).to_string()))
        .collect()
}

/// A set of arbitrary request-scoped header overrides, as supplied to
/// [`crate::Client::get`]'s options.
pub type RequestHeaders = HashMap<String, String>;
