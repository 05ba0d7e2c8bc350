//! Focus ledger aggregation
//!
//! Folds one finished participation into a user's ledger. Pure functions;
//! persistence and the `ledger_applied` guard live in the service layer.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, Utc};

use crate::models::{FocusLedger, Outcome, WeeklyStat};

/// Share of the focus length credited when a participation did not complete
pub const PARTIAL_CREDIT_RATIO: f64 = 0.5;

/// Number of topics kept in `top_topics`
const TOP_TOPICS: usize = 3;

/// Minutes credited for an outcome
pub fn credited_minutes(actual_duration: u32, outcome: Outcome) -> u32 {
    match outcome {
        Outcome::Completed => actual_duration,
        Outcome::Partial | Outcome::Interrupted => {
            (f64::from(actual_duration) * PARTIAL_CREDIT_RATIO).floor() as u32
        }
    }
}

/// Calendar day of `at`, server-local
pub fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Most recent Sunday (server-local) on or before `at`
pub fn week_start(at: DateTime<Utc>) -> NaiveDate {
    let day = local_day(at);
    day - Duration::days(i64::from(day.weekday().num_days_from_sunday()))
}

/// Oldest week start kept for a retention window
pub fn retention_cutoff(now: DateTime<Utc>, retention_weeks: u32) -> NaiveDate {
    local_day(now) - Duration::weeks(i64::from(retention_weeks))
}

/// One participation to fold into a ledger
#[derive(Debug, Clone)]
pub struct Credit<'a> {
    pub topic: &'a str,
    pub actual_duration: u32,
    pub outcome: Outcome,
}

impl Credit<'_> {
    pub fn minutes(&self) -> u32 {
        credited_minutes(self.actual_duration, self.outcome)
    }
}

/// Fold `credit` into `ledger` at time `now`
pub fn apply(ledger: &mut FocusLedger, credit: &Credit<'_>, now: DateTime<Utc>) {
    let minutes = credit.minutes();
    let completed = credit.outcome == Outcome::Completed;

    ledger.focus_patterns.streak = next_streak(
        ledger.focus_patterns.streak,
        ledger.focus_patterns.last_active_date,
        completed,
        now,
    );
    ledger.focus_patterns.last_active_date = Some(now);

    ledger.total_focus_minutes += minutes;
    ledger.total_sessions += 1;
    if completed {
        ledger.completed_sessions += 1;
    }

    let week = week_start(now);
    match ledger
        .weekly_stats
        .iter_mut()
        .find(|w| w.week_start == week)
    {
        Some(bucket) => {
            bucket.focus_minutes += minutes;
            bucket.session_count += 1;
            bucket.avg_session_duration =
                f64::from(bucket.focus_minutes) / f64::from(bucket.session_count);
            if !bucket.topics.iter().any(|t| t == credit.topic) {
                bucket.topics.push(credit.topic.to_string());
            }
            if !bucket.durations.contains(&credit.actual_duration) {
                bucket.durations.push(credit.actual_duration);
            }
        }
        None => {
            let mut bucket = WeeklyStat::new(week);
            bucket.focus_minutes = minutes;
            bucket.session_count = 1;
            bucket.avg_session_duration = f64::from(minutes);
            bucket.topics.push(credit.topic.to_string());
            bucket.durations.push(credit.actual_duration);
            ledger.weekly_stats.push(bucket);
        }
    }

    trim_retention(ledger, now);
    refresh_patterns(ledger);
    ledger.last_updated = now;
}

/// Drop weekly buckets older than the retention window
pub fn trim_retention(ledger: &mut FocusLedger, now: DateTime<Utc>) {
    let cutoff = retention_cutoff(now, ledger.retention_weeks);
    ledger.weekly_stats.retain(|w| w.week_start >= cutoff);
    ledger.weekly_stats.sort_by_key(|w| w.week_start);
}

/// Streak after one more participation.
///
/// A completion extends the streak when the previous activity is at most a day
/// old; anything else keeps it (recent) or resets it to zero.
pub fn next_streak(
    streak: u32,
    last_active: Option<DateTime<Utc>>,
    completed: bool,
    now: DateTime<Utc>,
) -> u32 {
    let recent = last_active
        .map(|last| (now - last).num_days() <= 1)
        .unwrap_or(false);

    match (completed, recent) {
        (true, true) => streak + 1,
        (true, false) => 1,
        (false, true) => streak,
        (false, false) => 0,
    }
}

/// Recompute derived patterns from totals and retained buckets
pub fn refresh_patterns(ledger: &mut FocusLedger) {
    let patterns = &mut ledger.focus_patterns;

    patterns.avg_completion_rate = if ledger.total_sessions == 0 {
        0.0
    } else {
        f64::from(ledger.completed_sessions) / f64::from(ledger.total_sessions)
    };

    let durations = ledger.weekly_stats.iter().flat_map(|w| w.durations.iter());
    patterns.preferred_duration_range = durations
        .clone()
        .min()
        .copied()
        .zip(durations.max().copied());

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for topic in ledger.weekly_stats.iter().flat_map(|w| w.topics.iter()) {
        *counts.entry(topic.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    patterns.top_topics = ranked
        .into_iter()
        .take(TOP_TOPICS)
        .map(|(t, _)| t.to_string())
        .collect();
}
