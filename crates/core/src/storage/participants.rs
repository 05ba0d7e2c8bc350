//! Session participant storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_datetime_opt, parse_enum_opt, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::SessionParticipant;

const PARTICIPANT_COLUMNS: &str = "id, session_id, identity_hash, display_alias, joined_at,
    left_at, is_active, last_reaction, outcome, ledger_applied";

fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<SessionParticipant> {
    Ok(SessionParticipant {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        session_id: parse_uuid(&row.get::<_, String>(1)?)?,
        identity_hash: row.get(2)?,
        display_alias: row.get(3)?,
        joined_at: parse_datetime(&row.get::<_, String>(4)?)?,
        left_at: parse_datetime_opt(row.get::<_, Option<String>>(5)?)?,
        is_active: row.get::<_, i32>(6)? != 0,
        last_reaction: parse_enum_opt(row.get::<_, Option<String>>(7)?)?,
        outcome: parse_enum_opt(row.get::<_, Option<String>>(8)?)?,
        ledger_applied: row.get::<_, i32>(9)? != 0,
    })
}

pub struct ParticipantStore<'a> {
    conn: &'a Connection,
}

impl<'a> ParticipantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a participant. Fails on a duplicate `(session_id, identity_hash)`.
    #[instrument(skip(self, participant), fields(session_id = %participant.session_id))]
    pub fn insert(&self, participant: &SessionParticipant) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO session_participants ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                PARTICIPANT_COLUMNS
            ),
            params![
                participant.id.to_string(),
                participant.session_id.to_string(),
                participant.identity_hash,
                participant.display_alias,
                participant.joined_at.to_rfc3339(),
                participant.left_at.map(|t| t.to_rfc3339()),
                participant.is_active as i32,
                participant.last_reaction.map(|r| r.as_str()),
                participant.outcome.map(|o| o.as_str()),
                participant.ledger_applied as i32,
            ],
        )?;
        Ok(())
    }

    /// Find the participation of an identity in a session
    #[instrument(skip(self, identity_hash))]
    pub fn find(&self, session_id: Uuid, identity_hash: &str) -> Result<Option<SessionParticipant>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM session_participants WHERE session_id = ?1 AND identity_hash = ?2",
            PARTICIPANT_COLUMNS
        ))?;
        let participant = stmt
            .query_row(params![session_id.to_string(), identity_hash], row_to_participant)
            .optional()?;
        Ok(participant)
    }

    /// Whether an identity is currently active in a session
    #[instrument(skip(self, identity_hash))]
    pub fn is_active(&self, session_id: Uuid, identity_hash: &str) -> Result<bool> {
        let active: Option<i32> = self
            .conn
            .query_row(
                "SELECT is_active FROM session_participants WHERE session_id = ?1 AND identity_hash = ?2",
                params![session_id.to_string(), identity_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active == Some(1))
    }

    /// Persist mutable participant state
    #[instrument(skip(self, participant), fields(session_id = %participant.session_id))]
    pub fn update(&self, participant: &SessionParticipant) -> Result<()> {
        self.conn.execute(
            "UPDATE session_participants SET left_at = ?1, is_active = ?2, last_reaction = ?3,
                outcome = ?4, ledger_applied = ?5
             WHERE id = ?6",
            params![
                participant.left_at.map(|t| t.to_rfc3339()),
                participant.is_active as i32,
                participant.last_reaction.map(|r| r.as_str()),
                participant.outcome.map(|o| o.as_str()),
                participant.ledger_applied as i32,
                participant.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// All participants of a session in join order
    #[instrument(skip(self))]
    pub fn list_for_session(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM session_participants WHERE session_id = ?1 ORDER BY joined_at",
            PARTICIPANT_COLUMNS
        ))?;
        let participants = stmt
            .query_map(params![session_id.to_string()], row_to_participant)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(participants)
    }

    /// Participations for a set of identity hashes, newest first
    #[instrument(skip(self, hashes), fields(count = hashes.len()))]
    pub fn list_for_hashes(&self, hashes: &[String]) -> Result<Vec<SessionParticipant>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM session_participants WHERE identity_hash = ?1",
            PARTICIPANT_COLUMNS
        ))?;

        let mut participants = Vec::new();
        for hash in hashes {
            let rows = stmt
                .query_map(params![hash], row_to_participant)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            participants.extend(rows);
        }
        participants.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(participants)
    }
}
