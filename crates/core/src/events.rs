//! Session events and the sink they are published to
//!
//! Events are best-effort notifications. Every value they carry can be
//! rebuilt from a plain read, so a subscriber that misses one just polls.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::{ChatMessage, Reaction, SessionStatus};
use crate::timer::TimerSnapshot;

/// Broadcast topic for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "channel", content = "session_id", rename_all = "snake_case")]
pub enum Topic {
    /// Lifecycle, membership and reaction events
    Session(Uuid),
    /// Chat messages
    Chat(Uuid),
}

impl Topic {
    pub fn session_id(&self) -> Uuid {
        match self {
            Topic::Session(id) | Topic::Chat(id) => *id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Session(id) => write!(f, "session:{}", id),
            Topic::Chat(id) => write!(f, "chat:{}", id),
        }
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, id) = s
            .split_once(':')
            .ok_or_else(|| Error::Validation(format!("invalid topic '{}'", s)))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| Error::Validation(format!("invalid topic id '{}'", id)))?;
        match channel {
            "session" => Ok(Topic::Session(id)),
            "chat" => Ok(Topic::Chat(id)),
            other => Err(Error::Validation(format!("unknown channel '{}'", other))),
        }
    }
}

/// A typed broadcast payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session_id: Uuid, timestamp: DateTime<Utc>, kind: SessionEventKind) -> Self {
        Self {
            session_id,
            timestamp,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    StatusChanged {
        status: SessionStatus,
        previous_status: SessionStatus,
        /// Present when entering `focusing`
        timer: Option<TimerSnapshot>,
    },
    ParticipantJoined {
        alias: String,
        is_active: bool,
        participant_count: u32,
    },
    ParticipantLeft {
        alias: String,
        is_active: bool,
        participant_count: u32,
    },
    ParticipantReaction {
        alias: String,
        reaction: Reaction,
    },
    ChatToggled {
        enabled: bool,
    },
    Message {
        message: ChatMessage,
    },
}

/// Destination for session events
pub trait EventSink: Send + Sync {
    /// Deliver to current subscribers of `topic`. Never blocks, never buffers.
    fn publish(&self, topic: Topic, event: SessionEvent);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _topic: Topic, _event: SessionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        let id = Uuid::new_v4();
        assert_eq!(Topic::Session(id).to_string(), format!("session:{}", id));
        assert_eq!(Topic::Chat(id).to_string(), format!("chat:{}", id));
        assert_eq!(Topic::from_str(&format!("chat:{}", id)).unwrap(), Topic::Chat(id));
        assert!(Topic::from_str("lobby:123").is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let id = Uuid::new_v4();
        let event = SessionEvent::new(
            id,
            Utc::now(),
            SessionEventKind::ParticipantJoined {
                alias: "Calm Otter 7".into(),
                is_active: true,
                participant_count: 2,
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "participant_joined");
        assert_eq!(json["participant_count"], 2);
        assert_eq!(json["session_id"], id.to_string());
    }
}
