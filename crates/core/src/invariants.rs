//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use chrono::{DateTime, Utc};

use crate::aggregator::retention_cutoff;
use crate::models::{FocusLedger, FocusSession, SessionParticipant, SessionStatus};

/// Validate that a session's stored state is internally consistent
pub fn assert_session_invariants(session: &FocusSession) {
    debug_assert!(
        session.min_duration <= session.actual_duration
            && session.actual_duration <= session.max_duration,
        "Session {} duration {} outside [{}, {}]",
        session.id,
        session.actual_duration,
        session.min_duration,
        session.max_duration
    );

    // Anything past warmup must carry the timer anchor
    let started = !matches!(
        session.status,
        SessionStatus::Waiting | SessionStatus::Warmup | SessionStatus::Cancelled
    );
    debug_assert!(
        !started || session.started_at.is_some(),
        "Session {} is {} but has no started_at",
        session.id,
        session.status
    );
}

/// Validate the denormalized count against the participant rows
pub fn assert_participant_count(session: &FocusSession, participants: &[SessionParticipant]) {
    let active = participants.iter().filter(|p| p.is_active).count();
    debug_assert!(
        active == session.participant_count as usize,
        "Session {} count {} but {} active rows",
        session.id,
        session.participant_count,
        active
    );

    let mut hashes: Vec<&str> = participants.iter().map(|p| p.identity_hash.as_str()).collect();
    hashes.sort_unstable();
    hashes.dedup();
    debug_assert!(
        hashes.len() == participants.len(),
        "Session {} has duplicate identity rows",
        session.id
    );
}

/// Validate ledger totals and retention after an update
pub fn assert_ledger_invariants(ledger: &FocusLedger, now: DateTime<Utc>) {
    debug_assert!(
        ledger.total_sessions >= ledger.completed_sessions,
        "Ledger for {} has more completions than sessions",
        ledger.user_id
    );

    let cutoff = retention_cutoff(now, ledger.retention_weeks);
    debug_assert!(
        ledger.weekly_stats.iter().all(|w| w.week_start >= cutoff),
        "Ledger for {} keeps weeks older than {}",
        ledger.user_id,
        cutoff
    );
}
