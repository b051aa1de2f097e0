//! §4.7 — the rate governor: server cooldown enforcement plus store
//! admission, invoked with `(resource, priority, signal, budget)`.

mod cooldown;
pub mod hints;

use std::time::Duration;

pub use cooldown::CooldownMap;
pub use hints::ServerHint;

use crate::capacity::Priority;
use crate::error::{PipelineError, Result};
use crate::headers::HeaderSnapshot;
use crate::stores::{AbortSignal, Budget, RateLimitHeaderNames, RateLimitStore};

/// A floor applied to poll-and-wait sleeps when a store reports "blocked"
/// without naming a concrete wait time (spec §4.7).
const MIN_POLL_WAIT_MS: u64 = 25;

/// Whether the store already recorded this admission atomically. When it
/// did, the orchestrator must not call `record` again (spec §4.7, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub already_recorded: bool,
}

/// Runs the server-cooldown phase for `origin`, honoring `throw_on_rate_limit`
/// and the cumulative wait `budget`.
///
/// `forced_wait` corresponds to the orchestrator re-entering this phase
/// between retry attempts (spec §4.9): even when `throw_on_rate_limit` is
/// set, a forced re-check always waits rather than failing, to avoid a
/// retry loop bypassing the cooldown by re-raising the error each time.
pub async fn enforce_cooldown(
    cooldowns: &CooldownMap,
    origin: &str,
    throw_on_rate_limit: bool,
    forced_wait: bool,
    signal: &AbortSignal,
    budget: &mut Budget,
    now_ms: impl Fn() -> i64,
) -> Result<()> {
    loop {
        let now = now_ms();
        let Some(remaining) = cooldowns.remaining_ms(origin, now) else {
            return Ok(());
        };

        if throw_on_rate_limit && !forced_wait {
            return Err(PipelineError::RateLimited {
                resource: origin.to_string(),
                origin: origin.to_string(),
                wait_ms: remaining.max(0) as u64,
            });
        }

        let wait = remaining.min(budget.remaining_ms()).max(0);
        if signal.sleep_or_abort(Duration::from_millis(wait as u64)).await.is_err() {
            return Err(PipelineError::Abort);
        }
        budget.spend(wait);
        if budget.is_exhausted() {
            return Err(PipelineError::BudgetExhausted);
        }
    }
}

/// Runs the store admission phase for `(resource, priority)`.
///
/// Prefers the store's atomic `acquire` when available; otherwise
/// poll-and-waits on `can_proceed`/`get_wait_time`, honoring
/// `throw_on_rate_limit` for an immediate refusal.
pub async fn admit(
    store: &dyn RateLimitStore,
    resource: &str,
    priority: Priority,
    throw_on_rate_limit: bool,
    signal: &AbortSignal,
    budget: &mut Budget,
) -> Result<Admission> {
    let probe = store.acquire(resource, priority).await.map_err(PipelineError::Store)?;
    if let Some(true) = probe {
        return Ok(Admission { already_recorded: true });
    }
    let uses_atomic_acquire = probe.is_some();
    // Seed the loop with the probe's own result rather than discarding it:
    // a denied atomic acquire must wait before trying again, not re-acquire
    // immediately on the loop's first iteration.
    let mut last_acquire_result = probe;

    loop {
        let allowed = if uses_atomic_acquire {
            matches!(last_acquire_result, Some(true))
        } else {
            store.can_proceed(resource, priority).await.map_err(PipelineError::Store)?
        };
        if allowed {
            return Ok(Admission { already_recorded: uses_atomic_acquire });
        }

        let wait = store
            .get_wait_time(resource, priority)
            .await
            .map_err(PipelineError::Store)?
            .unwrap_or(Duration::from_millis(MIN_POLL_WAIT_MS));

        if throw_on_rate_limit {
            return Err(PipelineError::RateLimited {
                resource: resource.to_string(),
                origin: resource.to_string(),
                wait_ms: wait.as_millis() as u64,
            });
        }

        let wait = wait.max(Duration::from_millis(MIN_POLL_WAIT_MS));
        let capped = wait.min(Duration::from_millis(budget.remaining_ms().max(0) as u64));

        if signal.sleep_or_abort(capped).await.is_err() {
            return Err(PipelineError::Abort);
        }
        budget.spend(capped.as_millis() as i64);
        if budget.is_exhausted() {
            return Err(PipelineError::BudgetExhausted);
        }

        if uses_atomic_acquire {
            last_acquire_result =
                store.acquire(resource, priority).await.map_err(PipelineError::Store)?;
        }
    }
}

/// Parses server-hint headers from a response and, if they call for one,
/// engages a cooldown for `origin`.
pub fn apply_server_hints(
    cooldowns: &CooldownMap,
    origin: &str,
    headers: &HeaderSnapshot,
    status: u16,
    names: &RateLimitHeaderNames,
    now_ms: i64,
) {
    if let Some(ServerHint { wait_ms }) = hints::parse(headers, status, names, now_ms) {
        cooldowns.engage(origin, wait_ms, now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysBlockedStore {
        calls: AtomicU32,
        allow_after: u32,
    }

    #[async_trait]
    impl RateLimitStore for AlwaysBlockedStore {
        async fn can_proceed(
            &self,
            _resource: &str,
            _priority: Priority,
        ) -> std::result::Result<bool, StoreError> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) >= self.allow_after)
        }

        async fn record(
            &self,
            _resource: &str,
            _priority: Priority,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn get_wait_time(
            &self,
            _resource: &str,
            _priority: Priority,
        ) -> std::result::Result<Option<Duration>, StoreError> {
            Ok(Some(Duration::from_millis(1)))
        }

        async fn get_status(
            &self,
            _resource: &str,
        ) -> std::result::Result<crate::stores::RateStatus, StoreError> {
            Ok(crate::stores::RateStatus {
                remaining: 0,
                reset_time_ms: 0,
                limit: 0,
                adaptive: None,
            })
        }
    }

    #[tokio::test]
    async fn cooldown_passes_immediately_when_absent() {
        let cooldowns = CooldownMap::new();
        let signal = AbortSignal::new();
        let mut budget = Budget::unlimited();
        let result =
            enforce_cooldown(&cooldowns, "example.com", true, false, &signal, &mut budget, || 0)
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cooldown_throws_when_configured_and_not_forced() {
        let cooldowns = CooldownMap::new();
        cooldowns.engage("example.com", 1_000, 0);
        let signal = AbortSignal::new();
        let mut budget = Budget::unlimited();
        let result =
            enforce_cooldown(&cooldowns, "example.com", true, false, &signal, &mut budget, || 0)
                .await;
        assert!(matches!(result, Err(PipelineError::RateLimited { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_waits_when_forced_even_with_throw_on_rate_limit() {
        let cooldowns = CooldownMap::new();
        cooldowns.engage("example.com", 50, 0);
        let signal = AbortSignal::new();
        let mut budget = Budget::unlimited();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            enforce_cooldown(&cooldowns, "example.com", true, true, &signal, &mut budget, || {
                0
            }),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn admit_polls_until_store_allows() {
        let store = AlwaysBlockedStore { calls: AtomicU32::new(0), allow_after: 2 };
        let signal = AbortSignal::new();
        let mut budget = Budget::unlimited();
        let admission =
            admit(&store, "widgets", Priority::Background, false, &signal, &mut budget)
                .await
                .unwrap();
        assert!(!admission.already_recorded);
    }
}
