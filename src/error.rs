//! The error taxonomy described in spec §7.

use miette::Diagnostic;
use thiserror::Error;

use crate::headers::HeaderSnapshot;

/// A `Result` typedef to use with [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The default domain error surfaced by [`crate::Client::get`].
///
/// Matches the taxonomy in spec §7: `abort` always propagates unwrapped
/// before anything else, `http`/`network` failures become [`PipelineError`]
/// variants (through a user `error_handler` for `http`, never for
/// `network`), and handler panics-as-errors propagate unchanged via
/// [`PipelineError::HandlerThrew`].
#[derive(Error, Diagnostic, Debug)]
pub enum PipelineError {
    /// The caller's [`crate::AbortSignal`] fired. Never passed to a
    /// user-supplied `error_handler`.
    #[error("request aborted")]
    #[diagnostic(code(http_pipeline::abort))]
    Abort,

    /// A response was received with a non-2xx status and no `error_handler`
    /// was configured (or the configured one chose to re-wrap).
    #[error("http error {status} for {url}")]
    #[diagnostic(code(http_pipeline::http))]
    Http {
        /// The response status code.
        status: u16,
        /// The parsed response body, if any.
        data: Option<crate::body::ResponseValue>,
        /// The response headers.
        headers: HeaderSnapshot,
        /// The request URL.
        url: String,
        /// A short human-readable message.
        message: String,
    },

    /// The transport itself failed (DNS, connect, socket, TLS). Never
    /// passed to a user-supplied `error_handler` — the toolkit owns
    /// network-layer errors per spec §7.
    #[error("network error: {0}")]
    #[diagnostic(code(http_pipeline::network))]
    Network(String),

    /// The rate governor refused the request and `throw_on_rate_limit` was
    /// set.
    #[error("rate limited on {resource} ({origin}): retry in {wait_ms}ms")]
    #[diagnostic(code(http_pipeline::rate_limited))]
    RateLimited {
        /// The logical resource bucket.
        resource: String,
        /// The origin the cooldown applies to.
        origin: String,
        /// How long the caller should wait before retrying.
        wait_ms: u64,
    },

    /// The rate governor's cumulative wait budget (`max_wait_time`) was
    /// exceeded before admission was granted.
    #[error("rate-limit wait budget exhausted")]
    #[diagnostic(code(http_pipeline::budget_exhausted))]
    BudgetExhausted,

    /// The response body could not be parsed and no fallback applied.
    #[error("response body could not be parsed: {0}")]
    #[diagnostic(code(http_pipeline::serialization))]
    Serialization(String),

    /// A user-supplied `response_handler` or `error_handler` returned an
    /// error. Propagated unchanged, not re-wrapped.
    #[error(transparent)]
    #[diagnostic(code(http_pipeline::handler_threw))]
    HandlerThrew(#[from] anyhow::Error),

    /// A dedup joiner observed the owner's job fail. The joiner does not
    /// retry as a new owner (spec §4.8, §9 open question; see DESIGN.md).
    #[error("upstream request for {fingerprint} failed")]
    #[diagnostic(code(http_pipeline::upstream_failed))]
    UpstreamFailed {
        /// The request fingerprint the failed job was keyed by.
        fingerprint: String,
    },

    /// A cache, dedup, or rate-limit store call failed. These are treated
    /// as infrastructural failures and are never retried (spec §7).
    #[error(transparent)]
    #[diagnostic(code(http_pipeline::store))]
    Store(#[from] StoreError),

    /// There was an error parsing the request URL.
    #[error(transparent)]
    #[diagnostic(code(http_pipeline::invalid_url))]
    InvalidUrl(#[from] url::ParseError),
}

impl PipelineError {
    /// True for [`PipelineError::Abort`]. Used by the orchestrator to make
    /// sure aborts skip the error classifier and custom handlers entirely.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, PipelineError::Abort)
    }
}

/// An error raised by a [`crate::CacheStore`], [`crate::DedupStore`], or
/// [`crate::RateLimitStore`] implementation.
///
/// The core never interprets the contents of this error beyond propagating
/// it; backend crates are expected to carry their own richer error types
/// and convert into this one at the trait boundary, the way `http-cache`'s
/// `CacheError` absorbs `cacache::Error` via `#[from]`.
#[derive(Error, Diagnostic, Debug)]
#[error("store error: {0}")]
#[diagnostic(code(http_pipeline::store_backend))]
pub struct StoreError(#[from] pub anyhow::Error);

impl StoreError {
    /// Build a store error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        StoreError(anyhow::anyhow!(message.into()))
    }
}
