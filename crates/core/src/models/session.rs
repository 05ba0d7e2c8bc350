//! Focus session model - one row per room

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Lifecycle status of a focus session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Warmup,
    Focusing,
    Break,
    Cooldown,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Warmup => "warmup",
            SessionStatus::Focusing => "focusing",
            SessionStatus::Break => "break",
            SessionStatus::Cooldown => "cooldown",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled sessions never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// New identities may only join before focus starts
    pub fn accepts_new_participants(&self) -> bool {
        matches!(self, SessionStatus::Waiting | SessionStatus::Warmup)
    }

    /// Statuses listed in the public directory
    pub fn is_listed(&self) -> bool {
        matches!(
            self,
            SessionStatus::Waiting | SessionStatus::Warmup | SessionStatus::Focusing
        )
    }

    /// Whether the focus phase has begun (credit can be earned)
    pub fn focus_started(&self) -> bool {
        matches!(
            self,
            SessionStatus::Focusing
                | SessionStatus::Break
                | SessionStatus::Cooldown
                | SessionStatus::Completed
        )
    }

    /// All statuses that are not terminal
    pub fn open_statuses() -> &'static [SessionStatus] {
        &[
            SessionStatus::Waiting,
            SessionStatus::Warmup,
            SessionStatus::Focusing,
            SessionStatus::Break,
            SessionStatus::Cooldown,
        ]
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "warmup" => Ok(SessionStatus::Warmup),
            "focusing" => Ok(SessionStatus::Focusing),
            "break" => Ok(SessionStatus::Break),
            "cooldown" => Ok(SessionStatus::Cooldown),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(Error::Validation(format!("unknown session status '{}'", other))),
        }
    }
}

/// A focus session (room)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: Uuid,
    pub intent: String,
    pub topic: String,
    pub min_duration: u32,
    pub max_duration: u32,
    /// Chosen focus length in minutes, fixed at creation
    pub actual_duration: u32,
    pub repetitions: u32,
    pub break_duration: u32,
    pub break_interval: u32,
    pub current_repetition: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    /// Single source of truth for the timer
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub creator_id: Uuid,
    /// Denormalized count of active participants
    pub participant_count: u32,
    pub matching_tags: Vec<String>,
    pub is_private: bool,
    pub invite_code: String,
    pub accepted_identity_hashes: Vec<String>,
    pub chat_enabled: bool,
    pub creator_display_name: String,
}

impl FocusSession {
    pub fn is_creator(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id
    }

    pub fn has_accepted(&self, identity_hash: &str) -> bool {
        self.accepted_identity_hashes
            .iter()
            .any(|h| h == identity_hash)
    }
}
