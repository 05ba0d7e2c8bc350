//! User profile storage (leaderboard nicknames)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_uuid, OptionalExt};
use crate::error::Result;

pub struct ProfileStore<'a> {
    conn: &'a Connection,
}

impl<'a> ProfileStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Owner of a nickname (case-insensitive)
    #[instrument(skip(self))]
    pub fn find_owner(&self, nickname: &str) -> Result<Option<Uuid>> {
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM user_profiles WHERE nickname = ?1",
                params![nickname],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.map(|s| parse_uuid(&s)).transpose()?)
    }

    /// Set or replace a user's nickname
    #[instrument(skip(self))]
    pub fn set_nickname(&self, user_id: Uuid, nickname: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_profiles (user_id, nickname, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                nickname = excluded.nickname,
                updated_at = excluded.updated_at",
            params![user_id.to_string(), nickname, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Nicknames keyed by user
    #[instrument(skip(self))]
    pub fn nicknames(&self) -> Result<HashMap<Uuid, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, nickname FROM user_profiles")?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((parse_uuid(&row.get::<_, String>(0)?)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(pairs)
    }
}
