//! Reward accrual for queued participants
//!
//! A participant earns one cambio per full [`REWARD_INTERVAL_SECS`] spent in
//! the queue. Nothing is stored per tick: every read recomputes the figures
//! from the join timestamp, so no timer or background job is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds of queue time per reward unit
pub const REWARD_INTERVAL_SECS: i64 = 180;

const REWARD_INTERVAL_MS: i64 = REWARD_INTERVAL_SECS * 1000;

/// Rewards earned so far and the countdown to the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accrual {
    pub earned: i64,
    pub seconds_to_next: i64,
}

/// Accrual for a participant who joined at `joined_at`, evaluated at `now`.
/// A `now` before `joined_at` counts as zero elapsed time.
pub fn accrual_at(joined_at: DateTime<Utc>, now: DateTime<Utc>) -> Accrual {
    let elapsed_ms = (now - joined_at).num_milliseconds().max(0);
    let elapsed_secs = elapsed_ms / 1000;

    Accrual {
        earned: elapsed_ms / REWARD_INTERVAL_MS,
        seconds_to_next: REWARD_INTERVAL_SECS - elapsed_secs % REWARD_INTERVAL_SECS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap()
    }

    #[test]
    fn test_zero_at_join() {
        let a = accrual_at(t0(), t0());
        assert_eq!(a, Accrual { earned: 0, seconds_to_next: 180 });
    }

    #[test]
    fn test_boundary_179_and_180() {
        let a = accrual_at(t0(), t0() + Duration::seconds(179));
        assert_eq!(a, Accrual { earned: 0, seconds_to_next: 1 });

        let a = accrual_at(t0(), t0() + Duration::seconds(180));
        assert_eq!(a, Accrual { earned: 1, seconds_to_next: 180 });
    }

    #[test]
    fn test_sub_second_precision() {
        // 179.999s is still short of the first unit
        let a = accrual_at(t0(), t0() + Duration::milliseconds(179_999));
        assert_eq!(a, Accrual { earned: 0, seconds_to_next: 1 });
    }

    #[test]
    fn test_join_ten_seconds_after_start() {
        // joined at T0+10s, polled at T0+190s
        let joined = t0() + Duration::seconds(10);
        let a = accrual_at(joined, t0() + Duration::seconds(190));
        assert_eq!(a.earned, 1);
        assert_eq!(a.seconds_to_next, 180);

        let a = accrual_at(joined, t0() + Duration::seconds(200));
        assert_eq!(a.earned, 1);
        assert_eq!(a.seconds_to_next, 170);
    }

    #[test]
    fn test_clock_skew_clamps_to_zero() {
        let a = accrual_at(t0(), t0() - Duration::seconds(45));
        assert_eq!(a, Accrual { earned: 0, seconds_to_next: 180 });
    }

    #[test]
    fn test_monotonic_and_deterministic() {
        let joined = t0();
        let mut previous = 0;
        for secs in (0..3_600).step_by(7) {
            let now = joined + Duration::seconds(secs);
            let a = accrual_at(joined, now);
            assert!(a.earned >= previous);
            assert!((1..=180).contains(&a.seconds_to_next));
            assert_eq!(a, accrual_at(joined, now));
            previous = a.earned;
        }
        assert_eq!(previous, 3_599 / 180);
    }
}
