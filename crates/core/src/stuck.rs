//! Expected-duration heuristic for detecting sessions whose job died.
//!
//! A session is considered stuck when it has been active longer than a
//! fixed per-sample time budget multiplied by its sample count. Detection
//! only reports; it never changes session state.

use chrono::Duration;

use crate::session::SessionStatus;
use crate::types::Timestamp;

/// Default time budget per rendered sample (5 minutes).
pub const DEFAULT_SAMPLE_BUDGET_SECS: i64 = 300;

/// How often the watchdog sweep runs by default.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Upper bound on how long a session with `num_samples` samples may stay
/// active. Sessions with zero samples still get one budget unit.
pub fn expected_max_duration(num_samples: i32, sample_budget: Duration) -> Duration {
    sample_budget * num_samples.max(1)
}

/// Whether a session has outlived its expected maximum duration.
///
/// Only active sessions (queued, running, cancelling) with a start time
/// can be stuck.
pub fn is_stuck(
    status: SessionStatus,
    started: Option<Timestamp>,
    num_samples: i32,
    now: Timestamp,
    sample_budget: Duration,
) -> bool {
    let Some(started) = started else {
        return false;
    };
    status.is_active() && now - started > expected_max_duration(num_samples, sample_budget)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn budget() -> Duration {
        Duration::seconds(DEFAULT_SAMPLE_BUDGET_SECS)
    }

    #[test]
    fn bound_scales_with_sample_count() {
        assert_eq!(expected_max_duration(1, budget()), Duration::minutes(5));
        assert_eq!(expected_max_duration(100, budget()), Duration::minutes(500));
        assert_eq!(expected_max_duration(0, budget()), Duration::minutes(5));
    }

    #[test]
    fn fresh_single_sample_session_not_stuck() {
        let now = Utc::now();
        assert!(!is_stuck(SessionStatus::Running, Some(now), 1, now, budget()));
    }

    #[test]
    fn single_sample_after_ten_minutes_is_stuck() {
        let now = Utc::now();
        let started = now - Duration::minutes(10);
        assert!(is_stuck(SessionStatus::Running, Some(started), 1, now, budget()));
        assert!(is_stuck(SessionStatus::Queued, Some(started), 1, now, budget()));
    }

    #[test]
    fn hundred_samples_after_ten_minutes_not_stuck() {
        let now = Utc::now();
        let started = now - Duration::minutes(10);
        assert!(!is_stuck(SessionStatus::Running, Some(started), 100, now, budget()));
    }

    #[test]
    fn hundred_samples_after_thousand_minutes_is_stuck() {
        let now = Utc::now();
        let started = now - Duration::minutes(1000);
        assert!(is_stuck(SessionStatus::Running, Some(started), 100, now, budget()));
    }

    #[test]
    fn resting_statuses_never_stuck() {
        let now = Utc::now();
        let started = now - Duration::days(30);
        for status in [
            SessionStatus::NotStarted,
            SessionStatus::Processed,
            SessionStatus::Deleting,
        ] {
            assert!(!is_stuck(status, Some(started), 1, now, budget()));
        }
        assert!(!is_stuck(SessionStatus::Running, None, 1, now, budget()));
    }
}
