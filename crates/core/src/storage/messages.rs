//! Session chat storage operations

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid};
use crate::error::Result;
use crate::models::ChatMessage;

pub struct MessageStore<'a> {
    conn: &'a Connection,
}

impl<'a> MessageStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a message, assigning the next per-session sequence number
    #[instrument(skip(self, message), fields(session_id = %message.session_id))]
    pub fn create(&self, message: &ChatMessage) -> Result<u64> {
        let sequence: u64 = self.conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM session_messages WHERE session_id = ?1",
            params![message.session_id.to_string()],
            |row| row.get(0),
        )?;

        self.conn.execute(
            "INSERT INTO session_messages (id, session_id, sender_alias, content, created_at, sequence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.session_id.to_string(),
                message.sender_alias,
                message.content,
                message.created_at.to_rfc3339(),
                sequence,
            ],
        )?;
        Ok(sequence)
    }

    /// The most recent `limit` messages, oldest first
    #[instrument(skip(self))]
    pub fn list_recent(&self, session_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, sender_alias, content, created_at FROM (
                SELECT id, session_id, sender_alias, content, created_at, sequence
                FROM session_messages
                WHERE session_id = ?1
                ORDER BY sequence DESC
                LIMIT ?2
             ) ORDER BY sequence ASC",
        )?;

        let messages = stmt
            .query_map(params![session_id.to_string(), limit], |row| {
                Ok(ChatMessage {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    session_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    sender_alias: row.get(2)?,
                    content: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}
