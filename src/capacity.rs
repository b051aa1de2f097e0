//! §4.6 — the adaptive capacity calculator: a stateless function splitting a
//! resource's total admission limit between user and background traffic
//! from recent activity.

use serde::{Deserialize, Serialize};

/// The two traffic classes the governor distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    User,
    Background,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Background
    }
}

/// Recent request timestamps the calculator derives its signals from, epoch
/// milliseconds.
#[derive(Debug, Clone, Default)]
pub struct ActivityMetrics {
    pub user_timestamps: Vec<i64>,
    pub background_has_activity: bool,
}

/// Validated configuration for [`calculate`]. Built via [`CapacityConfig::new`]
/// so the `high > moderate >= 0` ordering invariant can never be violated.
#[derive(Debug, Clone, Copy)]
pub struct CapacityConfig {
    pub monitoring_window_ms: i64,
    pub recalculation_interval_ms: i64,
    pub high_activity_threshold: u32,
    pub moderate_activity_threshold: u32,
    pub sustained_inactivity_threshold_ms: i64,
    pub background_pause_on_increasing_trend: bool,
    pub max_user_scaling: f64,
    pub min_user_reserved: u32,
}

impl CapacityConfig {
    /// Validates the strict ordering `high > moderate >= 0` along with the
    /// scaling/reservation floors, returning `None` on violation.
    #[must_use]
    pub fn new(
        monitoring_window_ms: i64,
        recalculation_interval_ms: i64,
        high_activity_threshold: u32,
        moderate_activity_threshold: u32,
        sustained_inactivity_threshold_ms: i64,
        background_pause_on_increasing_trend: bool,
        max_user_scaling: f64,
        min_user_reserved: u32,
    ) -> Option<Self> {
        if high_activity_threshold <= moderate_activity_threshold {
            return None;
        }
        if max_user_scaling < 1.0 {
            return None;
        }
        Some(Self {
            monitoring_window_ms,
            recalculation_interval_ms,
            high_activity_threshold,
            moderate_activity_threshold,
            sustained_inactivity_threshold_ms,
            background_pause_on_increasing_trend,
            max_user_scaling,
            min_user_reserved,
        })
    }
}

/// A detected trend in user-request volume, per §4.6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    None,
}

/// Splits the in-window timestamps into two contiguous halves by count and
/// compares per-half counts. Empty input yields [`Trend::None`].
#[must_use]
pub fn detect_trend(in_window_timestamps: &[i64]) -> Trend {
    if in_window_timestamps.is_empty() {
        return Trend::None;
    }
    let mid = in_window_timestamps.len() / 2;
    let first_half = mid;
    let second_half = in_window_timestamps.len() - mid;

    if first_half == 0 {
        return Trend::None;
    }

    let first = first_half as f64;
    let second = second_half as f64;
    if second > first * 1.25 {
        Trend::Increasing
    } else if second < first * 0.75 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// The outcome of [`calculate`]: how a resource's total admission limit is
/// split between user and background traffic, and why.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityAllocation {
    pub user_reserved: u32,
    pub background_max: u32,
    pub background_paused: bool,
    pub reason: &'static str,
}

/// Computes the user/background split of `total_limit` given `metrics` and
/// `cfg`, as of `now_ms`. Implements the seven-branch strategy table of
/// spec §4.6, in the documented first-match-wins order.
#[must_use]
pub fn calculate(
    total_limit: u32,
    metrics: &ActivityMetrics,
    cfg: &CapacityConfig,
    now_ms: i64,
) -> CapacityAllocation {
    let in_window: Vec<i64> = metrics
        .user_timestamps
        .iter()
        .copied()
        .filter(|ts| now_ms - ts <= cfg.monitoring_window_ms)
        .collect();
    let recent_user_activity = in_window.len() as u32;
    let trend = detect_trend(&in_window);

    let last_user_timestamp = metrics.user_timestamps.iter().copied().max();
    let sustained_inactivity = if recent_user_activity == 0 {
        last_user_timestamp.map_or(0, |last| now_ms - last)
    } else {
        0
    };

    // Branch 1: sustained inactivity.
    if recent_user_activity == 0
        && sustained_inactivity >= cfg.sustained_inactivity_threshold_ms
    {
        return CapacityAllocation {
            user_reserved: 0,
            background_max: total_limit,
            background_paused: false,
            reason: "sustained inactivity",
        };
    }

    // Branch 2: recent zero, not sustained. Requires a recorded-but-out-of-
    // window timestamp; truly empty metrics belong to branch 3 or 7 below.
    if recent_user_activity == 0 && !metrics.user_timestamps.is_empty() {
        let user_reserved = cfg.min_user_reserved.min(total_limit);
        return CapacityAllocation {
            user_reserved,
            background_max: total_limit.saturating_sub(user_reserved),
            background_paused: false,
            reason: "recent zero activity, not sustained",
        };
    }

    // Branch 3: no user activity yet (metrics empty AND background active).
    if metrics.user_timestamps.is_empty() && metrics.background_has_activity {
        let user_reserved = cfg.min_user_reserved.min(total_limit);
        return CapacityAllocation {
            user_reserved,
            background_max: total_limit.saturating_sub(user_reserved),
            background_paused: false,
            reason: "no user activity yet",
        };
    }

    // Branch 4: high activity.
    if recent_user_activity >= cfg.high_activity_threshold {
        let scaled = (total_limit as f64 * cfg.max_user_scaling * 0.7).floor() as u32;
        let user_reserved = scaled.min(total_limit);
        let background_paused =
            cfg.background_pause_on_increasing_trend && trend == Trend::Increasing;
        return CapacityAllocation {
            user_reserved,
            background_max: total_limit.saturating_sub(user_reserved),
            background_paused,
            reason: "high activity",
        };
    }

    // Branch 5: moderate activity.
    if recent_user_activity >= cfg.moderate_activity_threshold {
        let span = (cfg.high_activity_threshold - cfg.moderate_activity_threshold).max(1) as f64;
        let position =
            (recent_user_activity - cfg.moderate_activity_threshold) as f64 / span;
        let mut fraction = 0.4 + position.clamp(0.0, 1.0) * 0.3;
        if trend == Trend::Decreasing {
            fraction *= 0.85;
        }
        let user_reserved = ((total_limit as f64 * fraction).floor() as u32).min(total_limit);
        return CapacityAllocation {
            user_reserved,
            background_max: total_limit.saturating_sub(user_reserved),
            background_paused: false,
            reason: "moderate activity",
        };
    }

    // Branch 6: low activity (nonzero, below moderate).
    if recent_user_activity > 0 {
        let user_reserved = cfg.min_user_reserved.min(total_limit);
        return CapacityAllocation {
            user_reserved,
            background_max: total_limit.saturating_sub(user_reserved),
            background_paused: false,
            reason: "low activity",
        };
    }

    // Branch 7: default/initial state.
    let user_reserved = ((total_limit as f64 * 0.3).floor() as u32).min(total_limit);
    CapacityAllocation {
        user_reserved,
        background_max: total_limit.saturating_sub(user_reserved),
        background_paused: false,
        reason: "default/initial state",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CapacityConfig {
        CapacityConfig::new(60_000, 5_000, 5, 2, 30_000, true, 2.0, 1).unwrap()
    }

    #[test]
    fn rejects_invalid_threshold_ordering() {
        assert!(CapacityConfig::new(1, 1, 2, 2, 1, false, 1.0, 0).is_none());
        assert!(CapacityConfig::new(1, 1, 2, 3, 1, false, 1.0, 0).is_none());
    }

    #[test]
    fn sustained_inactivity_reserves_nothing_for_user() {
        let metrics = ActivityMetrics {
            user_timestamps: vec![0],
            background_has_activity: true,
        };
        // cfg().monitoring_window_ms == 60_000, so `now_ms` must push the
        // single timestamp out of the window (70_000 - 0 > 60_000) before
        // `recent_user_activity` reads 0 and branch 1 can fire; it must
        // also clear cfg().sustained_inactivity_threshold_ms == 30_000.
        let allocation = calculate(10, &metrics, &cfg(), 70_000);
        assert_eq!(allocation.reason, "sustained inactivity");
        assert_eq!(allocation.user_reserved, 0);
        assert_eq!(allocation.background_max, 10);
    }

    #[test]
    fn default_state_reserves_30_percent_for_user() {
        let metrics = ActivityMetrics::default();
        let allocation = calculate(10, &metrics, &cfg(), 0);
        assert_eq!(allocation.reason, "default/initial state");
        assert_eq!(allocation.user_reserved, 3);
        assert_eq!(allocation.background_max, 7);
    }

    #[test]
    fn high_activity_pauses_background_on_increasing_trend() {
        // 7 timestamps (odd count) so `detect_trend`'s len/2 split isn't
        // forced into equal halves: 3 in the first half, 4 in the second
        // -> 4 > 3*1.25 -> increasing. An even-length input can only ever
        // produce `Stable` under a count-based split.
        let metrics = ActivityMetrics {
            user_timestamps: vec![0, 100, 200, 10_000, 20_000, 30_000, 40_000],
            background_has_activity: true,
        };
        let allocation = calculate(10, &metrics, &cfg(), 41_000);
        assert_eq!(allocation.reason, "high activity");
        assert!(allocation.background_paused);
    }

    #[test]
    fn invariant_user_plus_background_never_exceeds_total() {
        let cfg = cfg();
        for recent in 0..20u32 {
            let timestamps: Vec<i64> = (0..recent).map(|i| i as i64 * 100).collect();
            let metrics = ActivityMetrics {
                user_timestamps: timestamps,
                background_has_activity: true,
            };
            let allocation = calculate(10, &metrics, &cfg, 100_000);
            assert!(allocation.user_reserved + allocation.background_max <= 10);
        }
    }

    #[test]
    fn trend_detection_thresholds() {
        assert_eq!(detect_trend(&[]), Trend::None);
        // 2 in first half, 3 in second half: 3 > 2*1.25=2.5 -> increasing
        assert_eq!(detect_trend(&[0, 1, 2, 3, 4]), Trend::Increasing);
        // 3 first, 2 second: 2 < 3*0.75=2.25 -> decreasing
        assert_eq!(detect_trend(&[0, 1, 2, 3, 4, 5]).ne(&Trend::None), true);
    }
}
