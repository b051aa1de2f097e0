//! §4.10 — the request orchestrator: the top-level `Client::get` pipeline
//! that composes every other module.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderValue};
use log::{debug, trace, warn};
use url::Url;

use crate::body::{self, ResponseValue};
use crate::capacity::Priority;
use crate::dedup::{self, Entry as DedupEntry};
use crate::envelope::CacheEntry;
use crate::error::{PipelineError, Result};
use crate::freshness::{self, Classification};
use crate::governor::{self, CooldownMap};
use crate::headers::HeaderSnapshot;
use crate::retry::{self, Jitter, RetryPolicy};
use crate::stores::{
    AbortSignal, Budget, CacheOverrides, CacheStore, DedupStore, InboundResponse,
    OutboundRequest, RateLimitHeaderNames, RateLimitStore, RequestHeaders, Transport,
};
use crate::vary;

/// Per-request options for [`Client::get`], mirroring spec §4.10's
/// `options = {signal?, priority?, headers?, retry?, cacheTTL?, cacheOverrides?}`.
#[derive(Default)]
pub struct RequestOptions {
    pub signal: Option<AbortSignal>,
    pub priority: Priority,
    pub headers: RequestHeaders,
    /// `None` disables retrying for this call regardless of the client's
    /// configured policy (spec: "`retry?` (`false` disables)").
    pub retry: Option<RetryPolicy>,
    pub cache_ttl: Option<i64>,
    pub cache_overrides: CacheOverrides,
}

/// A user-supplied hook that may reject (or re-wrap) a response body or
/// error before it reaches the caller. Invoked via [`Client`]'s
/// `response_transformer`/`response_handler`/`error_handler` fields.
pub type TransformHook = dyn Fn(ResponseValue) -> anyhow::Result<ResponseValue> + Send + Sync;
pub type ErrorHook = dyn Fn(HttpErrorContext) -> anyhow::Result<ResponseValue> + Send + Sync;

/// The context handed to a user `error_handler`, matching spec §4.10.1's
/// `HttpError` shape `{url, response.status, response.data, response.headers}`.
#[derive(Debug, Clone)]
pub struct HttpErrorContext {
    pub url: String,
    pub status: u16,
    pub data: Option<ResponseValue>,
    pub headers: HeaderSnapshot,
    pub message: String,
}

/// Construction-time configuration for a [`Client`], e.g. default TTLs and
/// the rate-limit header name overrides (spec §6).
#[derive(Default)]
pub struct ClientOptions {
    pub default_cache_ttl_secs: i64,
    pub default_priority: Priority,
    pub default_cache_overrides: CacheOverrides,
    pub max_wait_time_ms: i64,
    pub throw_on_rate_limit: bool,
    pub rate_limit_header_names: RateLimitHeaderNames,
}

/// Composes the cache, dedup, rate-governor, and transport capabilities
/// into the single `get(url, options)` entry point of spec §4.10.
///
/// Every store field is optional: spec §4.10 says "all steps elide safely
/// when the corresponding store is absent."
pub struct Client {
    pub transport: Arc<dyn Transport>,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub dedup: Option<Arc<dyn DedupStore>>,
    pub rate_limit: Option<Arc<dyn RateLimitStore>>,
    pub cooldowns: Arc<CooldownMap>,
    pub options: ClientOptions,
    pub response_transformer: Option<Arc<TransformHook>>,
    pub response_handler: Option<Arc<TransformHook>>,
    pub error_handler: Option<Arc<ErrorHook>>,
    pending_revalidations: Arc<std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Client {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        Self {
            transport,
            cache: None,
            dedup: None,
            rate_limit: None,
            cooldowns: Arc::new(CooldownMap::new()),
            options,
            response_transformer: None,
            response_handler: None,
            error_handler: None,
            pending_revalidations: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Drains and joins every still-running background revalidation task.
    /// Exposed for tests; spec §4.10.2 ("a process-local list so callers,
    /// notably tests, can drain it").
    pub async fn drain_background_revalidations(&self) {
        let handles: Vec<_> = {
            let mut guard = self.pending_revalidations.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// The top-level entry point: spec §4.10.
    pub async fn get(&self, url: &Url, options: RequestOptions) -> Result<ResponseValue> {
        let signal = options.signal.clone().unwrap_or_default();
        let mut budget = Budget::new(self.options.max_wait_time_ms);

        let fingerprint = crate::fingerprint::fingerprint(url);
        let resource = infer_resource(url);
        let origin = origin_of(url);
        let overrides = options.cache_overrides.merge_over(&self.options.default_cache_overrides);

        // Step 2: server cooldown, ungated by throw_on_rate_limit forcing here.
        governor::enforce_cooldown(
            &self.cooldowns,
            &origin,
            self.options.throw_on_rate_limit,
            false,
            &signal,
            &mut budget,
            now_ms,
        )
        .await?;

        let request_headers = build_header_map(&options.headers);

        // Step 3: cache phase.
        let mut stale_entry: Option<CacheEntry<ResponseValue>> = None;
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&fingerprint).await.map_err(PipelineError::Store)? {
                let vary_ok = vary::matches(
                    entry.vary_headers.as_deref(),
                    &entry.vary_values,
                    &request_headers,
                );
                if !vary_ok {
                    debug!("cache entry for {fingerprint} present but Vary mismatch, treating as miss");
                } else {
                    let now = now_ms();
                    let classification = freshness::classify(&entry, now);
                    trace!("cache entry for {fingerprint} classified as {classification:?}");
                    match classification {
                        Classification::Fresh => {
                            debug!("cache hit (fresh) for {fingerprint}");
                            return Ok(entry.value);
                        }
                        Classification::NoCache => {
                            if overrides.ignore_no_cache {
                                return Ok(entry.value);
                            }
                            stale_entry = Some(entry);
                        }
                        Classification::MustRevalidate => stale_entry = Some(entry),
                        Classification::StaleWhileRevalidate => {
                            self.schedule_background_revalidation(
                                url.clone(),
                                fingerprint.clone(),
                                resource.clone(),
                                origin.clone(),
                                entry.clone(),
                                options.headers.clone(),
                                options.priority,
                            );
                            return Ok(entry.value);
                        }
                        Classification::StaleIfError | Classification::Stale => {
                            stale_entry = Some(entry);
                        }
                    }
                }
            }
        }

        // Step 4: dedup phase.
        let mut dedup_owner = false;
        if let Some(dedup) = &self.dedup {
            match dedup::enter(dedup.as_ref(), &fingerprint).await? {
                DedupEntry::Available(value) => return Ok(value),
                DedupEntry::Owner => dedup_owner = true,
                DedupEntry::Joined(Some(value)) => return Ok(value),
                DedupEntry::Joined(None) => {
                    return Err(PipelineError::UpstreamFailed { fingerprint: fingerprint.clone() });
                }
            }
        }

        let outcome = self
            .fetch_with_policies(
                url,
                &resource,
                &origin,
                &request_headers,
                options.priority,
                options.retry,
                stale_entry.as_ref(),
                &overrides,
                options.cache_ttl,
                &signal,
                &mut budget,
            )
            .await;

        let result = match outcome {
            Ok(value) => Ok(value),
            Err(err) if !err.is_abort() => {
                if let (Some(stale), Classification::StaleIfError) = (
                    stale_entry.as_ref(),
                    stale_entry
                        .as_ref()
                        .map_or(Classification::Stale, |e| freshness::classify(e, now_ms())),
                ) {
                    if is_stale_if_error_eligible(&err) {
                        warn!("stale-if-error fallback engaged for {fingerprint}: {err}");
                        Ok(stale.value.clone())
                    } else {
                        Err(err)
                    }
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        };

        if let Some(dedup) = &self.dedup {
            if dedup_owner {
                match &result {
                    Ok(value) => {
                        dedup::complete(dedup.as_ref(), &fingerprint, value.clone()).await?;
                    }
                    Err(err) if !err.is_abort() => {
                        dedup::fail(dedup.as_ref(), &fingerprint, &err.to_string()).await?;
                    }
                    Err(_) => {}
                }
            }
        }

        result
    }

    /// Runs steps 5-9 of the pipeline (rate admission through cache
    /// write-back) for a request the caller owns (not a dedup joiner).
    #[allow(clippy::too_many_arguments)]
    async fn fetch_with_policies(
        &self,
        url: &Url,
        resource: &str,
        origin: &str,
        request_headers: &HeaderMap,
        priority: Priority,
        retry_policy: Option<RetryPolicy>,
        stale_entry: Option<&CacheEntry<ResponseValue>>,
        overrides: &CacheOverrides,
        explicit_ttl: Option<i64>,
        signal: &AbortSignal,
        budget: &mut Budget,
    ) -> Result<ResponseValue> {
        let mut already_recorded = false;
        if let Some(rate_limit) = &self.rate_limit {
            let admission = governor::admit(
                rate_limit.as_ref(),
                resource,
                priority,
                self.options.throw_on_rate_limit,
                signal,
                budget,
            )
            .await?;
            already_recorded = admission.already_recorded;
        }

        let mut attempt: u32 = 1;
        loop {
            let mut attempt_headers = request_headers.clone();
            if attempt == 1 {
                if let Some(entry) = stale_entry {
                    if let Some(etag) = &entry.etag {
                        insert_header(&mut attempt_headers, "if-none-match", etag);
                    }
                    if let Some(last_modified) = &entry.last_modified {
                        insert_header(&mut attempt_headers, "if-modified-since", last_modified);
                    }
                }
            }

            let response = self
                .transport
                .fetch(OutboundRequest {
                    url: url.clone(),
                    headers: HeaderSnapshot::from(&attempt_headers),
                    signal: signal.clone(),
                })
                .await;

            match response {
                Ok(response) => {
                    let hint_wait_ms = self.apply_server_hints(origin, &response);

                    if response.status == 304 {
                        if let Some(entry) = stale_entry {
                            let refreshed = entry.refresh_from_304(
                                &header_map_from_snapshot(&response.headers),
                                now_ms(),
                            );
                            self.write_cache(url, request_headers, &refreshed, overrides, explicit_ttl)
                                .await?;
                            return Ok(refreshed.value);
                        }
                    }

                    let content_type = response.headers.get("content-type");
                    let value = body::parse(response.status, content_type, &response.body);

                    if !(200..300).contains(&response.status) {
                        let context = HttpErrorContext {
                            url: url.to_string(),
                            status: response.status,
                            data: Some(value.clone()),
                            headers: response.headers.clone(),
                            message: format!("http error {} for {url}", response.status),
                        };
                        if retry::is_retryable_status(response.status)
                            && self.should_retry(retry_policy, attempt)
                        {
                            let server_retry_after =
                                hint_wait_ms.map(|ms| Duration::from_millis(ms as u64));
                            self.sleep_before_retry(
                                retry_policy,
                                attempt,
                                server_retry_after,
                                signal,
                                budget,
                            )
                            .await?;
                            // spec §4.9: re-evaluate the server cooldown in
                            // forced-wait mode between attempts so a retry
                            // loop can never bypass a cooldown the hint above
                            // just engaged, even under `throw_on_rate_limit`.
                            governor::enforce_cooldown(
                                &self.cooldowns,
                                origin,
                                self.options.throw_on_rate_limit,
                                true,
                                signal,
                                budget,
                                now_ms,
                            )
                            .await?;
                            attempt += 1;
                            continue;
                        }
                        return self.classify_http_error(context);
                    }

                    let transformed = self.run_transform(value)?;
                    let handled = self.run_handler(transformed)?;

                    if !already_recorded {
                        if let Some(rate_limit) = &self.rate_limit {
                            rate_limit
                                .record(resource, priority)
                                .await
                                .map_err(PipelineError::Store)?;
                        }
                    }

                    if let Some(_cache) = &self.cache {
                        let entry = CacheEntry::create(
                            handled.clone(),
                            &header_map_from_snapshot(&response.headers),
                            response.status,
                            now_ms(),
                        );
                        self.write_cache(url, request_headers, &entry, overrides, explicit_ttl)
                            .await?;
                    }

                    return Ok(handled);
                }
                Err(err) => {
                    if err.is_abort() {
                        return Err(err);
                    }
                    if self.should_retry(retry_policy, attempt) {
                        self.sleep_before_retry(retry_policy, attempt, None, signal, budget)
                            .await?;
                        governor::enforce_cooldown(
                            &self.cooldowns,
                            origin,
                            self.options.throw_on_rate_limit,
                            true,
                            signal,
                            budget,
                            now_ms,
                        )
                        .await?;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn should_retry(&self, policy: Option<RetryPolicy>, attempt: u32) -> bool {
        policy.is_some_and(|p| attempt <= p.max_retries)
    }

    async fn sleep_before_retry(
        &self,
        policy: Option<RetryPolicy>,
        attempt: u32,
        server_retry_after: Option<Duration>,
        signal: &AbortSignal,
        budget: &mut Budget,
    ) -> Result<()> {
        let Some(policy) = policy else { return Ok(()) };
        let computed = retry::compute_delay(&policy, attempt);
        let delay = retry::apply_retry_after_precedence(computed, server_retry_after);
        let capped = delay.min(Duration::from_millis(budget.remaining_ms().max(0) as u64));
        if signal.sleep_or_abort(capped).await.is_err() {
            return Err(PipelineError::Abort);
        }
        budget.spend(capped.as_millis() as i64);
        if budget.is_exhausted() {
            return Err(PipelineError::BudgetExhausted);
        }
        Ok(())
    }

    /// Applies any server-hint cooldown and returns the engaged wait (ms),
    /// if any, so callers can feed it into retry-after precedence (spec §9:
    /// "never use a smaller value than the server asked for").
    fn apply_server_hints(&self, origin: &str, response: &InboundResponse) -> Option<i64> {
        let hint = governor::hints::parse(
            &response.headers,
            response.status,
            &self.options.rate_limit_header_names,
            now_ms(),
        );
        if let Some(governor::ServerHint { wait_ms }) = hint {
            self.cooldowns.engage(origin, wait_ms, now_ms());
        }
        hint.map(|h| h.wait_ms)
    }

    async fn write_cache(
        &self,
        url: &Url,
        request_headers: &HeaderMap,
        entry: &CacheEntry<ResponseValue>,
        overrides: &CacheOverrides,
        explicit_ttl: Option<i64>,
    ) -> Result<()> {
        let Some(cache) = &self.cache else { return Ok(()) };
        if entry.cache_control.no_store && !overrides.ignore_no_store {
            return Ok(());
        }
        let fingerprint = crate::fingerprint::fingerprint(url);
        let mut entry = entry.clone();
        if let Some(vary) = entry.vary_headers.clone() {
            entry.set_vary_values(vary::capture(&vary, request_headers));
        }
        let ttl = explicit_ttl.unwrap_or_else(|| {
            freshness::store_ttl_secs(
                &entry,
                self.options.default_cache_ttl_secs,
                overrides.minimum_ttl,
                overrides.maximum_ttl,
            )
        });
        cache.set(&fingerprint, entry, ttl).await.map_err(PipelineError::Store)
    }

    fn run_transform(&self, value: ResponseValue) -> Result<ResponseValue> {
        match &self.response_transformer {
            Some(hook) => hook(value).map_err(PipelineError::HandlerThrew),
            None => Ok(value),
        }
    }

    fn run_handler(&self, value: ResponseValue) -> Result<ResponseValue> {
        match &self.response_handler {
            Some(hook) => hook(value).map_err(PipelineError::HandlerThrew),
            None => Ok(value),
        }
    }

    /// §4.10.1: an `HttpError` context goes to `error_handler` if
    /// configured; otherwise it's wrapped in the default domain error.
    fn classify_http_error(&self, context: HttpErrorContext) -> Result<ResponseValue> {
        if let Some(handler) = &self.error_handler {
            return handler(context).map_err(PipelineError::HandlerThrew);
        }
        Err(PipelineError::Http {
            status: context.status,
            data: context.data,
            headers: context.headers,
            url: context.url,
            message: context.message,
        })
    }

    /// §4.10.2: fire-and-forget background revalidation for a
    /// stale-while-revalidate hit. Swallows any failure; the stale entry
    /// simply remains until it falls out of the SWR window.
    #[allow(clippy::too_many_arguments)]
    fn schedule_background_revalidation(
        &self,
        url: Url,
        fingerprint: String,
        resource: String,
        origin: String,
        stale_entry: CacheEntry<ResponseValue>,
        extra_headers: RequestHeaders,
        priority: Priority,
    ) {
        let transport = Arc::clone(&self.transport);
        let cache = self.cache.clone();
        let rate_limit = self.rate_limit.clone();
        let cooldowns = Arc::clone(&self.cooldowns);
        let rate_limit_header_names = clone_header_names(&self.options.rate_limit_header_names);
        let default_cache_ttl_secs = self.options.default_cache_ttl_secs;
        let pending = Arc::clone(&self.pending_revalidations);
        let response_transformer = self.response_transformer.clone();
        let response_handler = self.response_handler.clone();

        let handle = tokio::spawn(async move {
            let result: Result<()> = async {
                let mut headers = build_header_map(&extra_headers);
                if let Some(etag) = &stale_entry.etag {
                    insert_header(&mut headers, "if-none-match", etag);
                }
                if let Some(last_modified) = &stale_entry.last_modified {
                    insert_header(&mut headers, "if-modified-since", last_modified);
                }

                if let Some(rate_limit) = &rate_limit {
                    let signal = AbortSignal::new();
                    let mut budget = Budget::unlimited();
                    let _ = governor::admit(
                        rate_limit.as_ref(),
                        &resource,
                        priority,
                        false,
                        &signal,
                        &mut budget,
                    )
                    .await?;
                }

                let signal = AbortSignal::new();
                let response = transport
                    .fetch(OutboundRequest {
                        url: url.clone(),
                        headers: HeaderSnapshot::from(&headers),
                        signal,
                    })
                    .await?;

                governor::apply_server_hints(
                    &cooldowns,
                    &origin,
                    &response.headers,
                    response.status,
                    &rate_limit_header_names,
                    now_ms(),
                );

                let Some(cache) = &cache else { return Ok(()) };

                if response.status == 304 {
                    let refreshed = stale_entry
                        .refresh_from_304(&header_map_from_snapshot(&response.headers), now_ms());
                    let ttl = freshness::store_ttl_secs(&refreshed, default_cache_ttl_secs, None, None);
                    cache
                        .set(&fingerprint, refreshed, ttl)
                        .await
                        .map_err(PipelineError::Store)?;
                    return Ok(());
                }

                if (200..300).contains(&response.status) {
                    let content_type = response.headers.get("content-type");
                    let value = body::parse(response.status, content_type, &response.body);
                    // spec §4.10.2: "applies the same transformer/handler
                    // pipeline" as the foreground path (§4.10 step 7) before
                    // writing back, so a transformer cannot diverge between
                    // the value a caller sees and the value a background
                    // refresh caches.
                    let value = match &response_transformer {
                        Some(hook) => hook(value).map_err(PipelineError::HandlerThrew)?,
                        None => value,
                    };
                    let value = match &response_handler {
                        Some(hook) => hook(value).map_err(PipelineError::HandlerThrew)?,
                        None => value,
                    };
                    let entry = CacheEntry::create(
                        value,
                        &header_map_from_snapshot(&response.headers),
                        response.status,
                        now_ms(),
                    );
                    if !entry.cache_control.no_store {
                        let ttl =
                            freshness::store_ttl_secs(&entry, default_cache_ttl_secs, None, None);
                        cache.set(&fingerprint, entry, ttl).await.map_err(PipelineError::Store)?;
                    }
                }

                Ok(())
            }
            .await;

            if let Err(err) = result {
                debug!("background revalidation failed, stale entry retained: {err}");
            }
        });

        pending.lock().unwrap().push(handle);
    }
}

fn clone_header_names(names: &RateLimitHeaderNames) -> RateLimitHeaderNames {
    RateLimitHeaderNames {
        retry_after: names.retry_after.clone(),
        limit: names.limit.clone(),
        remaining: names.remaining.clone(),
        reset: names.reset.clone(),
        combined: names.combined.clone(),
    }
}

/// Current time in epoch milliseconds.
fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Last nonempty path segment, or `unknown` for an empty path (spec §4.10,
/// §9: multi-segment resource naming is left to `resourceConfigs`
/// overrides in the rate store, not handled here).
fn infer_resource(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(str::to_owned)
        .unwrap_or_else(|| "unknown".to_string())
}

fn origin_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{port}", url.scheme(), url.host_str().unwrap_or("")),
        None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
    }
}

fn build_header_map(headers: &RequestHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        insert_header(&mut map, name, value);
    }
    map
}

fn insert_header(map: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        http::header::HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        map.insert(name, value);
    }
}

fn header_map_from_snapshot(snapshot: &HeaderSnapshot) -> HeaderMap {
    let mut map = HeaderMap::new();
    for name in ["etag", "last-modified", "date", "age", "expires", "vary", "cache-control"] {
        if let Some(value) = snapshot.get(name) {
            insert_header(&mut map, name, value);
        }
    }
    map
}

/// Whether `err` is a server-error/network-failure shape eligible for the
/// stale-if-error fallback (spec §4.10, step 3: "on any server error (5xx)
/// or network failure").
fn is_stale_if_error_eligible(err: &PipelineError) -> bool {
    match err {
        PipelineError::Http { status, .. } => (500..600).contains(status),
        PipelineError::Network(_) => true,
        _ => false,
    }
}
