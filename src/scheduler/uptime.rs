//! Uptime percentage from a sparse sequence of health pings.
//!
//! A gap between consecutive pings that is no longer than the station's
//! online threshold counts as fully online. A longer gap counts online only
//! for the first `threshold` of it; the station is assumed dead after that.
//! The tail from the last ping to `now` follows the same rule.

use chrono::{DateTime, Duration, Utc};

/// Percentage of `[window_start, now]` the station was online, in `[0, 100]`.
///
/// Events before `window_start` or after `now` are ignored. An empty window,
/// a window with no events, or a non-positive threshold all yield `0.0`.
pub fn compute_uptime_percent(
    events: &[DateTime<Utc>],
    threshold: Duration,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let window_ms = (now - window_start).num_milliseconds();
    if window_ms <= 0 || threshold <= Duration::zero() {
        return 0.0;
    }

    let mut in_window: Vec<DateTime<Utc>> = events
        .iter()
        .copied()
        .filter(|t| *t >= window_start && *t <= now)
        .collect();
    in_window.sort_unstable();

    let Some((&first, rest)) = in_window.split_first() else {
        return 0.0;
    };

    let mut online = Duration::zero();
    let mut prev = first;
    for &ts in rest {
        online = online + credited(ts - prev, threshold);
        prev = ts;
    }
    online = online + credited(now - prev, threshold);

    let pct = online.num_milliseconds() as f64 / window_ms as f64 * 100.0;
    pct.clamp(0.0, 100.0)
}

fn credited(gap: Duration, threshold: Duration) -> Duration {
    if gap <= Duration::zero() {
        Duration::zero()
    } else if gap <= threshold {
        gap
    } else {
        threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        base() + Duration::minutes(minutes)
    }

    #[test]
    fn test_coalesced_gaps_with_capped_tail() {
        // Two 5m gaps fully online, then a 10m tail capped at 5m: 15 of 20.
        let events = [at(0), at(5), at(10)];
        let pct = compute_uptime_percent(&events, Duration::minutes(5), at(0), at(20));
        assert!((pct - 75.0).abs() < 1e-9, "got {}", pct);
    }

    #[test]
    fn test_no_events_is_zero() {
        let pct = compute_uptime_percent(&[], Duration::minutes(5), at(0), at(60));
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn test_degenerate_window_is_zero() {
        let events = [at(0)];
        assert_eq!(compute_uptime_percent(&events, Duration::minutes(5), at(0), at(0)), 0.0);
        assert_eq!(compute_uptime_percent(&events, Duration::minutes(5), at(10), at(0)), 0.0);
    }

    #[test]
    fn test_non_positive_threshold_is_zero() {
        let events = [at(0), at(1)];
        assert_eq!(compute_uptime_percent(&events, Duration::zero(), at(0), at(2)), 0.0);
        assert_eq!(compute_uptime_percent(&events, Duration::minutes(-5), at(0), at(2)), 0.0);
    }

    #[test]
    fn test_single_event_only_tail_counts() {
        let events = [at(30)];
        // Tail 30m capped at 10m.
        let pct = compute_uptime_percent(&events, Duration::minutes(10), at(0), at(60));
        assert!((pct - 100.0 / 6.0).abs() < 1e-9);
        // Tail 5m fully credited.
        let pct = compute_uptime_percent(&events, Duration::minutes(10), at(0), at(35));
        assert!((pct - 100.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_events_before_window_are_truncated() {
        // The ping at -1 would cover [0, 4] if it counted; it must not.
        let events = [at(-1), at(10)];
        let pct = compute_uptime_percent(&events, Duration::minutes(5), at(0), at(20));
        assert!((pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_unordered_and_duplicate_events() {
        let events = [at(10), at(0), at(5), at(5)];
        let pct = compute_uptime_percent(&events, Duration::minutes(5), at(0), at(20));
        assert!((pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_coverage_is_hundred() {
        let events: Vec<_> = (0..=24 * 60).map(|m: i64| at(m)).collect();
        let pct = compute_uptime_percent(&events, Duration::minutes(5), at(0), at(24 * 60));
        assert!((pct - 100.0).abs() < 1e-9);
    }

    /// Deterministic pseudo-random minute offsets in `[0, span)`.
    fn scattered(seed: u64, count: usize, span: i64) -> Vec<DateTime<Utc>> {
        let mut x = seed;
        (0..count)
            .map(|_| {
                x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                at(((x >> 33) as i64).rem_euclid(span))
            })
            .collect()
    }

    #[test]
    fn test_result_is_bounded() {
        for seed in 0..50u64 {
            let events = scattered(seed, (seed as usize % 40) + 1, 600);
            for threshold in [1, 5, 30, 240] {
                let threshold = Duration::minutes(threshold);
                let pct = compute_uptime_percent(&events, threshold, at(0), at(600));
                assert!((0.0..=100.0).contains(&pct), "seed {}: {}", seed, pct);
            }
        }
    }

    #[test]
    fn test_more_frequent_pings_never_decrease_uptime() {
        let threshold = Duration::minutes(10);
        for seed in 0..30u64 {
            let mut events = scattered(seed, 8, 300);
            events.sort();
            let before = compute_uptime_percent(&events, threshold, at(0), at(300));

            // Split every gap with a ping at its midpoint.
            let mut denser = events.clone();
            for pair in events.windows(2) {
                denser.push(pair[0] + (pair[1] - pair[0]) / 2);
            }
            let after = compute_uptime_percent(&denser, threshold, at(0), at(300));
            assert!(after + 1e-9 >= before, "seed {}: {} -> {}", seed, before, after);
        }
    }
}
