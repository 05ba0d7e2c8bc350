//! Focus ledger models - per-user aggregates with no session references

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of weeks of history kept
pub const DEFAULT_RETENTION_WEEKS: u32 = 12;

/// One week bucket of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyStat {
    /// Sunday that starts the week, server-local
    pub week_start: NaiveDate,
    pub focus_minutes: u32,
    pub session_count: u32,
    pub avg_session_duration: f64,
    pub topics: Vec<String>,
    pub durations: Vec<u32>,
}

impl WeeklyStat {
    pub fn new(week_start: NaiveDate) -> Self {
        Self {
            week_start,
            focus_minutes: 0,
            session_count: 0,
            avg_session_duration: 0.0,
            topics: Vec::new(),
            durations: Vec::new(),
        }
    }
}

/// Derived focus habits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FocusPatterns {
    /// (shortest, longest) session length seen in the retained window
    pub preferred_duration_range: Option<(u32, u32)>,
    pub top_topics: Vec<String>,
    pub avg_completion_rate: f64,
    pub streak: u32,
    pub last_active_date: Option<DateTime<Utc>>,
}

/// Rolling per-user aggregate of focus activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusLedger {
    pub user_id: Uuid,
    pub total_focus_minutes: u32,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    pub weekly_stats: Vec<WeeklyStat>,
    pub focus_patterns: FocusPatterns,
    pub retention_weeks: u32,
    pub last_updated: DateTime<Utc>,
}

impl FocusLedger {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_focus_minutes: 0,
            total_sessions: 0,
            completed_sessions: 0,
            weekly_stats: Vec::new(),
            focus_patterns: FocusPatterns::default(),
            retention_weeks: DEFAULT_RETENTION_WEEKS,
            last_updated: now,
        }
    }
}

/// Per-day rollup used for heatmaps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyFocusActivity {
    pub user_id: Uuid,
    pub day: NaiveDate,
    pub session_count: u32,
    pub total_minutes: u32,
    pub completed_count: u32,
}
