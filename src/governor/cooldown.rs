//! §4.7 — the per-origin server cooldown map.
//!
//! Process-local and requires mutual exclusion around writes in a
//! multi-threaded implementation (spec §5); `dashmap` gives us striped
//! locking for that rather than a single global mutex, the same choice the
//! teacher makes for its per-host state.

use dashmap::DashMap;

/// Tracks, per origin, the epoch-ms deadline before which requests must not
/// proceed.
#[derive(Default)]
pub struct CooldownMap {
    deadlines: DashMap<String, i64>,
}

impl CooldownMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the remaining cooldown in ms for `origin` at `now_ms`, or
    /// `None` if there is no cooldown or it has already passed. A passed
    /// cooldown is cleared as a side effect.
    pub fn remaining_ms(&self, origin: &str, now_ms: i64) -> Option<i64> {
        let Some(entry) = self.deadlines.get(origin) else {
            return None;
        };
        let deadline = *entry;
        drop(entry);
        if deadline <= now_ms {
            self.deadlines.remove(origin);
            return None;
        }
        Some(deadline - now_ms)
    }

    /// Engages a cooldown ending at `now_ms + wait_ms`. A new cooldown
    /// never shortens an existing one for the same origin (spec: server
    /// hints compound the way the lychee reference backoff does via
    /// `max`, even though each origin's deadline — not a running backoff
    /// duration — is what's tracked here).
    pub fn engage(&self, origin: &str, wait_ms: i64, now_ms: i64) {
        let deadline = now_ms + wait_ms.max(0);
        self.deadlines
            .entry(origin.to_string())
            .and_modify(|existing| *existing = (*existing).max(deadline))
            .or_insert(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_origin_has_no_cooldown() {
        let map = CooldownMap::new();
        assert_eq!(map.remaining_ms("example.com", 0), None);
    }

    #[test]
    fn engaged_cooldown_reports_remaining_and_clears_after_passing() {
        let map = CooldownMap::new();
        map.engage("example.com", 1_000, 0);
        assert_eq!(map.remaining_ms("example.com", 500), Some(500));
        assert_eq!(map.remaining_ms("example.com", 1_000), None);
        // cleared: a later check at an earlier notional time still sees nothing.
        assert_eq!(map.remaining_ms("example.com", 999), None);
    }

    #[test]
    fn a_shorter_cooldown_never_shortens_an_existing_one() {
        let map = CooldownMap::new();
        map.engage("example.com", 10_000, 0);
        map.engage("example.com", 1_000, 0);
        assert_eq!(map.remaining_ms("example.com", 5_000), Some(5_000));
    }
}
