//! Server-authoritative session timer
//!
//! Remaining time is always recomputed from `started_at`; there is no stored
//! countdown to drift or double-decrement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FocusSession, SessionStatus};

/// Timer state sent with every broadcast and query response.
///
/// Clients subtract `local_clock - server_timestamp` before starting a local countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub remaining_seconds: u64,
    pub elapsed_seconds: u64,
    pub target_duration_minutes: u32,
    pub server_timestamp: DateTime<Utc>,
}

impl TimerSnapshot {
    /// Compute the timer for a focus of `duration_minutes` started at `started_at`
    pub fn compute(started_at: DateTime<Utc>, duration_minutes: u32, now: DateTime<Utc>) -> Self {
        let elapsed_ms = (now - started_at).num_milliseconds().max(0);
        let elapsed_seconds = (elapsed_ms / 1000) as u64;
        let target_seconds = u64::from(duration_minutes) * 60;

        Self {
            remaining_seconds: target_seconds.saturating_sub(elapsed_seconds),
            elapsed_seconds,
            target_duration_minutes: duration_minutes,
            server_timestamp: now,
        }
    }

    /// Zero remaining time; clients use this to request `end_session`
    pub fn is_expired(&self) -> bool {
        self.remaining_seconds == 0
    }
}

/// Timer for a session, if it has started
pub fn session_timer(session: &FocusSession, now: DateTime<Utc>) -> Option<TimerSnapshot> {
    let started_at = session.started_at?;
    // Past the focus phase the clock is frozen at its end
    let at = match session.status {
        SessionStatus::Focusing | SessionStatus::Break => now,
        _ => session.ended_at.unwrap_or(now),
    };
    Some(TimerSnapshot::compute(started_at, session.actual_duration, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_full_duration_at_start() {
        let start = Utc::now();
        let snap = TimerSnapshot::compute(start, 25, start);
        assert_eq!(snap.remaining_seconds, 25 * 60);
        assert_eq!(snap.elapsed_seconds, 0);
        assert_eq!(snap.target_duration_minutes, 25);
    }

    #[test]
    fn test_floor_of_elapsed_milliseconds() {
        let start = Utc::now();
        let snap = TimerSnapshot::compute(start, 25, start + Duration::milliseconds(1999));
        assert_eq!(snap.elapsed_seconds, 1);
        assert_eq!(snap.remaining_seconds, 25 * 60 - 1);
    }

    #[test]
    fn test_clamps_at_zero() {
        let start = Utc::now();
        let snap = TimerSnapshot::compute(start, 5, start + Duration::minutes(90));
        assert_eq!(snap.remaining_seconds, 0);
        assert!(snap.is_expired());
    }

    #[test]
    fn test_idempotent_and_monotonic() {
        let start = Utc::now();
        let now = start + Duration::seconds(42);
        let a = TimerSnapshot::compute(start, 30, now);
        let b = TimerSnapshot::compute(start, 30, now);
        assert_eq!(a, b);

        let mut previous = u64::MAX;
        for secs in (0..2000).step_by(37) {
            let snap = TimerSnapshot::compute(start, 30, start + Duration::seconds(secs));
            assert!(snap.remaining_seconds <= previous);
            previous = snap.remaining_seconds;
        }
    }

    #[test]
    fn test_clock_skew_before_start() {
        let start = Utc::now();
        let snap = TimerSnapshot::compute(start, 10, start - Duration::seconds(3));
        assert_eq!(snap.remaining_seconds, 600);
    }
}
