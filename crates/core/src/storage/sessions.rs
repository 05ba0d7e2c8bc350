//! Focus session storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_datetime_opt, parse_enum, parse_json, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{FocusSession, SessionStatus};

const SESSION_COLUMNS: &str = "id, intent, topic, min_duration, max_duration, actual_duration,
    repetitions, break_duration, break_interval, current_repetition, status, created_at,
    started_at, ended_at, creator_id, participant_count, matching_tags, is_private,
    invite_code, accepted_identity_hashes, chat_enabled, creator_display_name";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<FocusSession> {
    Ok(FocusSession {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        intent: row.get(1)?,
        topic: row.get(2)?,
        min_duration: row.get(3)?,
        max_duration: row.get(4)?,
        actual_duration: row.get(5)?,
        repetitions: row.get(6)?,
        break_duration: row.get(7)?,
        break_interval: row.get(8)?,
        current_repetition: row.get(9)?,
        status: parse_enum(&row.get::<_, String>(10)?)?,
        created_at: parse_datetime(&row.get::<_, String>(11)?)?,
        started_at: parse_datetime_opt(row.get::<_, Option<String>>(12)?)?,
        ended_at: parse_datetime_opt(row.get::<_, Option<String>>(13)?)?,
        creator_id: parse_uuid(&row.get::<_, String>(14)?)?,
        participant_count: row.get(15)?,
        matching_tags: parse_json(&row.get::<_, String>(16)?)?,
        is_private: row.get::<_, i32>(17)? != 0,
        invite_code: row.get(18)?,
        accepted_identity_hashes: parse_json(&row.get::<_, String>(19)?)?,
        chat_enabled: row.get::<_, i32>(20)? != 0,
        creator_display_name: row.get(21)?,
    })
}

/// SQL list literal for a set of statuses (values are fixed identifiers)
fn status_list(statuses: &[SessionStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct SessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new session
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub fn create(&self, session: &FocusSession) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO focus_sessions ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22)",
                SESSION_COLUMNS
            ),
            params![
                session.id.to_string(),
                session.intent,
                session.topic,
                session.min_duration,
                session.max_duration,
                session.actual_duration,
                session.repetitions,
                session.break_duration,
                session.break_interval,
                session.current_repetition,
                session.status.as_str(),
                session.created_at.to_rfc3339(),
                session.started_at.map(|t| t.to_rfc3339()),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.creator_id.to_string(),
                session.participant_count,
                serde_json::to_string(&session.matching_tags)?,
                session.is_private as i32,
                session.invite_code,
                serde_json::to_string(&session.accepted_identity_hashes)?,
                session.chat_enabled as i32,
                session.creator_display_name,
            ],
        )?;
        Ok(())
    }

    /// Find session by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<FocusSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM focus_sessions WHERE id = ?1",
            SESSION_COLUMNS
        ))?;
        let session = stmt
            .query_row(params![id.to_string()], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// Find session by invite code
    #[instrument(skip(self, code))]
    pub fn find_by_invite_code(&self, code: &str) -> Result<Option<FocusSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM focus_sessions WHERE invite_code = ?1",
            SESSION_COLUMNS
        ))?;
        let session = stmt.query_row(params![code], row_to_session).optional()?;
        Ok(session)
    }

    /// Persist mutable session state
    #[instrument(skip(self, session), fields(session_id = %session.id, status = %session.status))]
    pub fn update(&self, session: &FocusSession) -> Result<()> {
        self.conn.execute(
            "UPDATE focus_sessions SET status = ?1, started_at = ?2, ended_at = ?3,
                current_repetition = ?4, accepted_identity_hashes = ?5, chat_enabled = ?6,
                invite_code = ?7
             WHERE id = ?8",
            params![
                session.status.as_str(),
                session.started_at.map(|t| t.to_rfc3339()),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.current_repetition,
                serde_json::to_string(&session.accepted_identity_hashes)?,
                session.chat_enabled as i32,
                session.invite_code,
                session.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Recount active participants into the denormalized counter
    #[instrument(skip(self))]
    pub fn refresh_participant_count(&self, id: Uuid) -> Result<u32> {
        self.conn.execute(
            "UPDATE focus_sessions SET participant_count = (
                SELECT COUNT(*) FROM session_participants
                WHERE session_id = ?1 AND is_active = 1
             ) WHERE id = ?1",
            params![id.to_string()],
        )?;
        let count = self.conn.query_row(
            "SELECT participant_count FROM focus_sessions WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// List sessions in any of the given statuses, newest first
    #[instrument(skip(self))]
    pub fn list_by_status(&self, statuses: &[SessionStatus]) -> Result<Vec<FocusSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM focus_sessions WHERE status IN ({}) ORDER BY created_at DESC",
            SESSION_COLUMNS,
            status_list(statuses)
        ))?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// IDs of every session that has not ended
    #[instrument(skip(self))]
    pub fn list_open_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM focus_sessions WHERE status IN ({})",
            status_list(SessionStatus::open_statuses())
        ))?;
        let ids = stmt
            .query_map([], |row| parse_uuid(&row.get::<_, String>(0)?))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Public sessions shown in the directory
    #[instrument(skip(self))]
    pub fn list_public_listed(&self) -> Result<Vec<FocusSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM focus_sessions
             WHERE is_private = 0 AND status IN ({})
             ORDER BY created_at DESC",
            SESSION_COLUMNS,
            status_list(&[
                SessionStatus::Waiting,
                SessionStatus::Warmup,
                SessionStatus::Focusing
            ])
        ))?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Sessions created by a user, newest first
    #[instrument(skip(self))]
    pub fn list_created_by(&self, user_id: Uuid) -> Result<Vec<FocusSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM focus_sessions WHERE creator_id = ?1 ORDER BY created_at DESC",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![user_id.to_string()], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Sessions still in one of `statuses` that were created before `before`
    #[instrument(skip(self))]
    pub fn list_stale(
        &self,
        statuses: &[SessionStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<FocusSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM focus_sessions WHERE status IN ({}) AND created_at < ?1",
            SESSION_COLUMNS,
            status_list(statuses)
        ))?;
        let sessions = stmt
            .query_map(params![before.to_rfc3339()], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}
