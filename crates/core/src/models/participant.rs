//! Session participant model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// How a participation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Partial,
    Interrupted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Partial => "partial",
            Outcome::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Outcome::Completed),
            "partial" => Ok(Outcome::Partial),
            "interrupted" => Ok(Outcome::Interrupted),
            other => Err(Error::Validation(format!("unknown outcome '{}'", other))),
        }
    }
}

/// Reactions participants can send to the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Focus,
    Energy,
    Break,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Focus => "focus",
            Reaction::Energy => "energy",
            Reaction::Break => "break",
        }
    }
}

impl FromStr for Reaction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focus" => Ok(Reaction::Focus),
            "energy" => Ok(Reaction::Energy),
            "break" => Ok(Reaction::Break),
            other => Err(Error::Validation(format!("unknown reaction '{}'", other))),
        }
    }
}

/// One pseudonymous participation in a session.
///
/// Keyed by `(session_id, identity_hash)`; the real user id is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParticipant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub identity_hash: String,
    pub display_alias: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_reaction: Option<Reaction>,
    pub outcome: Option<Outcome>,
    /// Set once the ledger has folded this participation in
    pub ledger_applied: bool,
}

impl SessionParticipant {
    pub fn new(
        session_id: Uuid,
        identity_hash: String,
        display_alias: String,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            identity_hash,
            display_alias,
            joined_at,
            left_at: None,
            is_active: true,
            last_reaction: None,
            outcome: None,
            ledger_applied: false,
        }
    }
}
