//! Focus ledger storage operations
//!
//! Ledger rows are keyed by user and never reference a session. The
//! `ledger_identities` index is the only link from an identity hash back to
//! a user and is read only by the aggregation path.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_date, parse_datetime, parse_json, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{DailyFocusActivity, FocusLedger};

fn row_to_ledger(row: &Row<'_>) -> rusqlite::Result<FocusLedger> {
    Ok(FocusLedger {
        user_id: parse_uuid(&row.get::<_, String>(0)?)?,
        total_focus_minutes: row.get(1)?,
        total_sessions: row.get(2)?,
        completed_sessions: row.get(3)?,
        weekly_stats: parse_json(&row.get::<_, String>(4)?)?,
        focus_patterns: parse_json(&row.get::<_, String>(5)?)?,
        retention_weeks: row.get(6)?,
        last_updated: parse_datetime(&row.get::<_, String>(7)?)?,
    })
}

/// Per-user totals over a window of daily activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityTotals {
    pub user_id: Uuid,
    pub total_minutes: u32,
    pub session_count: u32,
}

pub struct LedgerStore<'a> {
    conn: &'a Connection,
}

impl<'a> LedgerStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Load a user's ledger
    #[instrument(skip(self))]
    pub fn find(&self, user_id: Uuid) -> Result<Option<FocusLedger>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, total_focus_minutes, total_sessions, completed_sessions,
                    weekly_stats, focus_patterns, retention_weeks, last_updated
             FROM focus_ledgers WHERE user_id = ?1",
        )?;
        let ledger = stmt
            .query_row(params![user_id.to_string()], row_to_ledger)
            .optional()?;
        Ok(ledger)
    }

    /// Insert or replace a user's ledger
    #[instrument(skip(self, ledger), fields(user_id = %ledger.user_id))]
    pub fn save(&self, ledger: &FocusLedger) -> Result<()> {
        self.conn.execute(
            "INSERT INTO focus_ledgers (user_id, total_focus_minutes, total_sessions,
                completed_sessions, weekly_stats, focus_patterns, retention_weeks, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                total_focus_minutes = excluded.total_focus_minutes,
                total_sessions = excluded.total_sessions,
                completed_sessions = excluded.completed_sessions,
                weekly_stats = excluded.weekly_stats,
                focus_patterns = excluded.focus_patterns,
                retention_weeks = excluded.retention_weeks,
                last_updated = excluded.last_updated",
            params![
                ledger.user_id.to_string(),
                ledger.total_focus_minutes,
                ledger.total_sessions,
                ledger.completed_sessions,
                serde_json::to_string(&ledger.weekly_stats)?,
                serde_json::to_string(&ledger.focus_patterns)?,
                ledger.retention_weeks,
                ledger.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Every ledger, for leaderboard ranking
    #[instrument(skip(self))]
    pub fn list_all(&self) -> Result<Vec<FocusLedger>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, total_focus_minutes, total_sessions, completed_sessions,
                    weekly_stats, focus_patterns, retention_weeks, last_updated
             FROM focus_ledgers",
        )?;
        let ledgers = stmt
            .query_map([], row_to_ledger)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ledgers)
    }

    /// Add one participation to the user's day
    #[instrument(skip(self))]
    pub fn record_daily(
        &self,
        user_id: Uuid,
        day: NaiveDate,
        minutes: u32,
        completed: bool,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO daily_focus_activity (user_id, day, session_count, total_minutes, completed_count)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(user_id, day) DO UPDATE SET
                session_count = session_count + 1,
                total_minutes = total_minutes + excluded.total_minutes,
                completed_count = completed_count + excluded.completed_count",
            params![
                user_id.to_string(),
                day.format("%Y-%m-%d").to_string(),
                minutes,
                completed as i32,
            ],
        )?;
        Ok(())
    }

    /// Daily rows for a user within `[from, to]`
    #[instrument(skip(self))]
    pub fn daily_between(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyFocusActivity>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, day, session_count, total_minutes, completed_count
             FROM daily_focus_activity
             WHERE user_id = ?1 AND day >= ?2 AND day <= ?3
             ORDER BY day",
        )?;
        let days = stmt
            .query_map(
                params![
                    user_id.to_string(),
                    from.format("%Y-%m-%d").to_string(),
                    to.format("%Y-%m-%d").to_string(),
                ],
                |row| {
                    Ok(DailyFocusActivity {
                        user_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        day: parse_date(&row.get::<_, String>(1)?)?,
                        session_count: row.get(2)?,
                        total_minutes: row.get(3)?,
                        completed_count: row.get(4)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(days)
    }

    /// Per-user totals since `from` (inclusive)
    #[instrument(skip(self))]
    pub fn totals_since(&self, from: NaiveDate) -> Result<Vec<ActivityTotals>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, SUM(total_minutes), SUM(session_count)
             FROM daily_focus_activity
             WHERE day >= ?1
             GROUP BY user_id",
        )?;
        let totals = stmt
            .query_map(params![from.format("%Y-%m-%d").to_string()], |row| {
                Ok(ActivityTotals {
                    user_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    total_minutes: row.get(1)?,
                    session_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(totals)
    }

    /// Remember which user an identity hash belongs to
    #[instrument(skip(self, identity_hash))]
    pub fn register_identity(&self, identity_hash: &str, user_id: Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO ledger_identities (identity_hash, user_id) VALUES (?1, ?2)",
            params![identity_hash, user_id.to_string()],
        )?;
        Ok(())
    }

    /// Resolve an identity hash back to its user
    #[instrument(skip(self, identity_hash))]
    pub fn resolve_identity(&self, identity_hash: &str) -> Result<Option<Uuid>> {
        let user: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM ledger_identities WHERE identity_hash = ?1",
                params![identity_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user.map(|s| parse_uuid(&s)).transpose()?)
    }

    /// Every identity hash registered for a user
    #[instrument(skip(self))]
    pub fn identities_for(&self, user_id: Uuid) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity_hash FROM ledger_identities WHERE user_id = ?1")?;
        let hashes = stmt
            .query_map(params![user_id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(hashes)
    }

    /// Remove the ledger, daily activity and identity index for a user.
    ///
    /// Identities of sessions that are still open are kept so those sessions
    /// can settle. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub fn purge(&self, user_id: Uuid) -> Result<usize> {
        let id = user_id.to_string();
        let mut removed = self
            .conn
            .execute("DELETE FROM focus_ledgers WHERE user_id = ?1", params![id])?;
        removed += self
            .conn
            .execute("DELETE FROM daily_focus_activity WHERE user_id = ?1", params![id])?;
        removed += self
            .conn
            .execute(
                "DELETE FROM ledger_identities
                 WHERE user_id = ?1 AND identity_hash NOT IN (
                    SELECT p.identity_hash FROM session_participants p
                    JOIN focus_sessions s ON s.id = p.session_id
                    WHERE s.status IN ('waiting', 'warmup', 'focusing', 'break', 'cooldown')
                 )",
                params![id],
            )?;
        Ok(removed)
    }
}
