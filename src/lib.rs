//! Cache, single-flight coalescing, and adaptive rate-limit governance for
//! outbound HTTP GET requests.
//!
//! This crate is the pipeline core described by its design document: a
//! [`Client`] composes an RFC 9111-aware response cache, a request
//! coalescer, and an adaptive rate governor around a single
//! [`Client::get`] entry point. It ships trait definitions for the three
//! pluggable stores (cache, dedup, rate-limit) and for the transport, but
//! no production backend — those are downstream crates' concern, the way
//! `http-cache-reqwest` sits downstream of `http-cache`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use http_pipeline::{Client, ClientOptions, RequestOptions};
//!
//! # async fn _doc(transport: Arc<dyn http_pipeline::Transport>) -> http_pipeline::Result<()> {
//! let client = Client::new(transport, ClientOptions::default());
//! let url = url::Url::parse("https://api.example.com/widgets")?;
//! let value = client.get(&url, RequestOptions::default()).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod capacity;
pub mod dedup;
pub mod directives;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod freshness;
mod governor;
pub mod headers;
pub mod orchestrator;
pub mod retry;
pub mod stores;
pub mod vary;

#[cfg(feature = "test-util")]
pub mod testing;

pub use body::ResponseValue;
pub use capacity::{ActivityMetrics, CapacityAllocation, CapacityConfig, Priority, Trend};
pub use directives::CacheControl;
pub use envelope::CacheEntry;
pub use error::{PipelineError, Result, StoreError};
pub use fingerprint::fingerprint;
pub use freshness::Classification;
pub use governor::CooldownMap;
pub use headers::HeaderSnapshot;
pub use orchestrator::{
    Client, ClientOptions, ErrorHook, HttpErrorContext, RequestOptions, TransformHook,
};
pub use retry::{Jitter, RetryPolicy};
pub use stores::{
    AbortSignal, Budget, CacheOverrides, CacheStore, DedupStore, InboundResponse,
    OutboundRequest, RateLimitHeaderNames, RateLimitStore, RateStatus, Registration,
    RequestHeaders, Transport,
};
