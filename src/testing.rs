//! In-memory store and transport fakes behind the `test-util` feature.
//!
//! Exercises the pipeline without a real backend, the way `http-cache`'s
//! `MokaManager` lets its own test suite run without a disk or network
//! round-trip. Downstream crates building a real backend (disk, Redis,
//! SQL, ...) can reuse these fakes too, rather than write their own from
//! scratch, to validate the pipeline wiring before swapping in production
//! stores.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::body::ResponseValue;
use crate::capacity::Priority;
use crate::envelope::CacheEntry;
use crate::error::{PipelineError, Result, StoreError};
use crate::stores::{
    CacheStore, DedupStore, InboundResponse, OutboundRequest, RateLimitStore, RateStatus,
    Registration, Transport,
};

/// An in-memory [`CacheStore`]. TTLs are tracked against a monotonic clock
/// supplied by the caller (real wall-clock time, via [`std::time::Instant`])
/// rather than simulated, so tests exercise the same expiry arithmetic a
/// real backend would.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (CacheEntry<ResponseValue>, Option<std::time::Instant>)>>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries. Exposed for assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = std::time::Instant::now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|(_, expiry)| expiry.is_none_or(|deadline| deadline > now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        key: &str,
    ) -> std::result::Result<Option<CacheEntry<ResponseValue>>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let Some((entry, expiry)) = entries.get(key) else {
            return Ok(None);
        };
        if let Some(deadline) = expiry {
            if *deadline <= std::time::Instant::now() {
                entries.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(entry.clone()))
    }

    async fn set(
        &self,
        key: &str,
        entry: CacheEntry<ResponseValue>,
        ttl_seconds: i64,
    ) -> std::result::Result<(), StoreError> {
        let expiry = match ttl_seconds {
            0 => None,
            n if n < 0 => Some(std::time::Instant::now()),
            n => Some(std::time::Instant::now() + Duration::from_secs(n as u64)),
        };
        self.entries.lock().unwrap().insert(key.to_string(), (entry, expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn clear(&self) -> std::result::Result<(), StoreError> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

enum Job {
    Pending(Vec<tokio::sync::oneshot::Sender<Option<ResponseValue>>>),
    Done(Option<ResponseValue>),
}

/// An in-memory [`DedupStore`] backed by a single mutex-guarded job table.
/// `register_or_join` is atomic because the whole check-and-insert happens
/// under one lock acquisition, matching the single-flight guarantee spec §5
/// requires "across a process that shares a dedupe store."
#[derive(Default)]
pub struct MemoryDedupStore {
    jobs: Mutex<HashMap<String, Job>>,
    next_job_id: AtomicU64,
}

impl MemoryDedupStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn wait_for(
        &self,
        key: &str,
    ) -> std::result::Result<Option<ResponseValue>, StoreError> {
        let rx = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(key) {
                Some(Job::Done(value)) => return Ok(value.clone()),
                Some(Job::Pending(waiters)) => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                None => return Ok(None),
            }
        };
        Ok(rx.await.unwrap_or(None))
    }

    async fn register_or_join(
        &self,
        key: &str,
    ) -> std::result::Result<Registration, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        if jobs.contains_key(key) {
            return Ok(Registration { job_id, is_owner: false });
        }
        jobs.insert(key.to_string(), Job::Pending(Vec::new()));
        Ok(Registration { job_id, is_owner: true })
    }

    async fn register(&self, key: &str) -> std::result::Result<(), StoreError> {
        self.jobs.lock().unwrap().entry(key.to_string()).or_insert_with(|| Job::Pending(Vec::new()));
        Ok(())
    }

    async fn complete(
        &self,
        key: &str,
        value: ResponseValue,
    ) -> std::result::Result<(), StoreError> {
        let waiters = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.insert(key.to_string(), Job::Done(Some(value.clone()))) {
                Some(Job::Pending(waiters)) => waiters,
                _ => return Ok(()), // already completed: idempotent no-op
            }
        };
        for tx in waiters {
            let _ = tx.send(Some(value.clone()));
        }
        Ok(())
    }

    async fn fail(&self, key: &str, _error: &str) -> std::result::Result<(), StoreError> {
        let waiters = {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.remove(key)
        };
        if let Some(Job::Pending(waiters)) = waiters {
            for tx in waiters {
                let _ = tx.send(None);
            }
        }
        Ok(())
    }

    async fn is_in_progress(&self, key: &str) -> std::result::Result<bool, StoreError> {
        Ok(matches!(self.jobs.lock().unwrap().get(key), Some(Job::Pending(_))))
    }
}

/// A fixed-window [`RateLimitStore`] with no atomic `acquire` (the
/// orchestrator must fall back to `can_proceed` + `record`), so tests cover
/// both admission paths alongside [`AtomicRateLimitStore`].
pub struct MemoryRateLimitStore {
    limit: u32,
    window: Duration,
    counts: Mutex<HashMap<(String, Priority), VecDeque<std::time::Instant>>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, counts: Mutex::new(HashMap::new()) }
    }

    fn prune_locked(
        window: Duration,
        entries: &mut VecDeque<std::time::Instant>,
        now: std::time::Instant,
    ) {
        while entries.front().is_some_and(|t| now.duration_since(*t) > window) {
            entries.pop_front();
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn can_proceed(
        &self,
        resource: &str,
        priority: Priority,
    ) -> std::result::Result<bool, StoreError> {
        let now = std::time::Instant::now();
        let mut counts = self.counts.lock().unwrap();
        let entries = counts.entry((resource.to_string(), priority)).or_default();
        Self::prune_locked(self.window, entries, now);
        Ok(entries.len() < self.limit as usize)
    }

    async fn record(
        &self,
        resource: &str,
        priority: Priority,
    ) -> std::result::Result<(), StoreError> {
        let now = std::time::Instant::now();
        let mut counts = self.counts.lock().unwrap();
        let entries = counts.entry((resource.to_string(), priority)).or_default();
        Self::prune_locked(self.window, entries, now);
        entries.push_back(now);
        Ok(())
    }

    async fn get_wait_time(
        &self,
        resource: &str,
        priority: Priority,
    ) -> std::result::Result<Option<Duration>, StoreError> {
        let now = std::time::Instant::now();
        let mut counts = self.counts.lock().unwrap();
        let entries = counts.entry((resource.to_string(), priority)).or_default();
        Self::prune_locked(self.window, entries, now);
        if entries.len() < self.limit as usize {
            return Ok(None);
        }
        let oldest = *entries.front().unwrap();
        let remaining = self.window.saturating_sub(now.duration_since(oldest));
        Ok(Some(remaining))
    }

    async fn get_status(&self, resource: &str) -> std::result::Result<RateStatus, StoreError> {
        let now = std::time::Instant::now();
        let mut counts = self.counts.lock().unwrap();
        let used: usize = [Priority::User, Priority::Background]
            .iter()
            .map(|p| {
                let entries = counts.entry((resource.to_string(), *p)).or_default();
                Self::prune_locked(self.window, entries, now);
                entries.len()
            })
            .sum();
        Ok(RateStatus {
            remaining: self.limit.saturating_sub(used as u32),
            reset_time_ms: 0,
            limit: self.limit,
            adaptive: None,
        })
    }
}

/// A [`RateLimitStore`] that exposes the atomic `acquire` capability,
/// compare-and-swap style, so the orchestrator's "store already recorded
/// the admission" path (spec §4.7) gets test coverage distinct from
/// [`MemoryRateLimitStore`]'s check-then-record fallback.
pub struct AtomicRateLimitStore {
    limit: u32,
    used: AtomicU32,
}

impl AtomicRateLimitStore {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self { limit, used: AtomicU32::new(0) }
    }
}

#[async_trait]
impl RateLimitStore for AtomicRateLimitStore {
    async fn can_proceed(
        &self,
        _resource: &str,
        _priority: Priority,
    ) -> std::result::Result<bool, StoreError> {
        Ok(self.used.load(Ordering::SeqCst) < self.limit)
    }

    async fn acquire(
        &self,
        _resource: &str,
        _priority: Priority,
    ) -> std::result::Result<Option<bool>, StoreError> {
        let result = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            });
        Ok(Some(result.is_ok()))
    }

    async fn record(
        &self,
        _resource: &str,
        _priority: Priority,
    ) -> std::result::Result<(), StoreError> {
        self.used.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_wait_time(
        &self,
        _resource: &str,
        _priority: Priority,
    ) -> std::result::Result<Option<Duration>, StoreError> {
        Ok(if self.used.load(Ordering::SeqCst) < self.limit {
            None
        } else {
            Some(Duration::from_millis(25))
        })
    }

    async fn get_status(&self, _resource: &str) -> std::result::Result<RateStatus, StoreError> {
        Ok(RateStatus {
            remaining: self.limit.saturating_sub(self.used.load(Ordering::SeqCst)),
            reset_time_ms: 0,
            limit: self.limit,
            adaptive: None,
        })
    }
}

/// A scripted response queued on [`ScriptedTransport`].
pub enum Scripted {
    Response(InboundResponse),
    Fail(String),
}

/// A [`Transport`] fake that serves a queue of scripted responses (falling
/// back to repeating the last one once exhausted) and counts calls, so
/// tests can assert "the transport was invoked exactly once" (spec §8,
/// dedup single-flight property).
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<InboundResponse>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a 200 response with the given body and no extra headers.
    #[must_use]
    pub fn with_json_response(self, status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        let mut snapshot = crate::headers::HeaderSnapshot::new();
        for (name, value) in headers {
            snapshot.append(name, *value);
        }
        self.script.lock().unwrap().push_back(Scripted::Response(InboundResponse {
            status,
            headers: snapshot,
            body: body.to_string(),
        }));
        self
    }

    #[must_use]
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Fail(message.into()));
        self
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: OutboundRequest) -> Result<InboundResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.signal.is_aborted() {
            return Err(PipelineError::Abort);
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response(response)) => {
                *self.last.lock().unwrap() = Some(response.clone());
                Ok(response)
            }
            Some(Scripted::Fail(message)) => Err(PipelineError::Network(message)),
            None => match self.last.lock().unwrap().clone() {
                Some(response) => Ok(response),
                None => Err(PipelineError::Network("no scripted response queued".to_string())),
            },
        }
    }
}

/// A [`Transport`] wrapper that delays every call by a fixed duration
/// before delegating, used to widen the race window in dedup-coalescing
/// tests (spec §8 scenario 5).
pub struct DelayedTransport<T> {
    inner: T,
    delay: Duration,
}

impl<T> DelayedTransport<T> {
    #[must_use]
    pub fn new(inner: T, delay: Duration) -> Self {
        Self { inner, delay }
    }

    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for DelayedTransport<T> {
    async fn fetch(&self, request: OutboundRequest) -> Result<InboundResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch(request).await
    }
}
