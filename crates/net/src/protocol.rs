//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire. A
//! connection opens with `Hello`, then carries numbered requests, topic
//! subscriptions and pushed events in both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use focusroom_core::{
    AcceptedInvite, ActiveSession, ChatMessage, CompletedSession, CreateSessionParams,
    CreatedSession, Error as CoreError, ErrorKind, FocusHeatmap, FocusOverview, InvitePreview,
    JoinedSession, LeaderboardEntry, LeaderboardQuery, MessagePage, Outcome, Reaction, RoomView,
    SessionEvent, SessionListing, SessionSummary, SessionView, TimerSnapshot, Topic, UserInfo,
    UserSessionEntry, DEFAULT_MESSAGE_PAGE,
};
use focusroom_core::{check_page, validate_message, validate_nickname, validate_retention};

fn default_message_page() -> u32 {
    DEFAULT_MESSAGE_PAGE
}

/// Frames sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection
    Hello { token: String },

    /// Invoke one service operation; answered by a frame with the same `id`
    Request { id: u64, request: Request },

    Subscribe { topic: Topic },

    Unsubscribe { topic: Topic },

    /// Keepalive
    Ping,
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted
    Welcome { user: UserInfo },

    /// Handshake refused; the server closes the connection after this
    HelloRejected { error: WireError },

    Response { id: u64, response: Response },

    Failure { id: u64, error: WireError },

    /// Pushed event for a subscribed topic
    Event { topic: Topic, event: SessionEvent },

    Subscribed { topic: Topic },

    Unsubscribed { topic: Topic },

    /// Keepalive response with the server's clock
    Pong { server_time: DateTime<Utc> },

    /// Server is going down
    ShuttingDown,
}

/// One service operation, performed on behalf of the connection's user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateSession { params: CreateSessionParams },
    JoinSession { session_id: Uuid },
    LeaveSession { session_id: Uuid },
    StartWarmup { session_id: Uuid },
    SkipWarmup { session_id: Uuid },
    StartSession { session_id: Uuid },
    EndSession { session_id: Uuid },
    CompleteSession { session_id: Uuid },
    CancelSession { session_id: Uuid },
    SendReaction { session_id: Uuid, reaction: Reaction },
    RecordOutcome { session_id: Uuid, outcome: Outcome },
    SendMessage { session_id: Uuid, content: String },
    ToggleChat { session_id: Uuid, enabled: bool },
    AcceptPrivateInvite { invite_code: String },
    RegenerateInviteCode { session_id: Uuid },
    UpdateRetentionPreference { retention_weeks: u32 },
    ClearFocusData,
    UpdateNickname { nickname: String },

    GetActiveSession,
    GetActiveSessions,
    GetMyRooms,
    GetSession { session_id: Uuid },
    GetSessionMessages {
        session_id: Uuid,
        #[serde(default = "default_message_page")]
        limit: u32,
    },
    GetSessionByInvite { invite_code: String },
    GetSessionSummary { session_id: Uuid },
    GetFocusOverview,
    GetUserSessions,
    GetFocusHeatmap {
        #[serde(default)]
        year: Option<i32>,
    },
    GetLeaderboard {
        #[serde(default)]
        query: LeaderboardQuery,
    },
}

impl Request {
    /// Operation name, as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateSession { .. } => "create_session",
            Request::JoinSession { .. } => "join_session",
            Request::LeaveSession { .. } => "leave_session",
            Request::StartWarmup { .. } => "start_warmup",
            Request::SkipWarmup { .. } => "skip_warmup",
            Request::StartSession { .. } => "start_session",
            Request::EndSession { .. } => "end_session",
            Request::CompleteSession { .. } => "complete_session",
            Request::CancelSession { .. } => "cancel_session",
            Request::SendReaction { .. } => "send_reaction",
            Request::RecordOutcome { .. } => "record_outcome",
            Request::SendMessage { .. } => "send_message",
            Request::ToggleChat { .. } => "toggle_chat",
            Request::AcceptPrivateInvite { .. } => "accept_private_invite",
            Request::RegenerateInviteCode { .. } => "regenerate_invite_code",
            Request::UpdateRetentionPreference { .. } => "update_retention_preference",
            Request::ClearFocusData => "clear_focus_data",
            Request::UpdateNickname { .. } => "update_nickname",
            Request::GetActiveSession => "get_active_session",
            Request::GetActiveSessions => "get_active_sessions",
            Request::GetMyRooms => "get_my_rooms",
            Request::GetSession { .. } => "get_session",
            Request::GetSessionMessages { .. } => "get_session_messages",
            Request::GetSessionByInvite { .. } => "get_session_by_invite",
            Request::GetSessionSummary { .. } => "get_session_summary",
            Request::GetFocusOverview => "get_focus_overview",
            Request::GetUserSessions => "get_user_sessions",
            Request::GetFocusHeatmap { .. } => "get_focus_heatmap",
            Request::GetLeaderboard { .. } => "get_leaderboard",
        }
    }

    /// Reject malformed arguments before they reach the service
    pub fn validate(&self) -> focusroom_core::Result<()> {
        match self {
            Request::CreateSession { params } => params.validate(),
            Request::SendMessage { content, .. } => validate_message(content).map(|_| ()),
            Request::UpdateNickname { nickname } => validate_nickname(nickname).map(|_| ()),
            Request::UpdateRetentionPreference { retention_weeks } => {
                validate_retention(*retention_weeks)
            }
            Request::GetSessionMessages { limit, .. } => check_page(*limit),
            Request::GetLeaderboard { query } => query.validate(),
            Request::AcceptPrivateInvite { invite_code }
            | Request::GetSessionByInvite { invite_code } => {
                if invite_code.trim().is_empty() {
                    Err(CoreError::Validation("invite code is empty".into()))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Whether the request changes stored state
    pub fn is_mutation(&self) -> bool {
        !self.name().starts_with("get_")
    }
}

/// Successful result of a `Request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Response {
    /// Operation with no payload
    Done,
    Created(CreatedSession),
    Joined(JoinedSession),
    /// Warmup or cooldown text
    Prompt(String),
    Timer(TimerSnapshot),
    Completed(CompletedSession),
    Cancelled(Vec<Uuid>),
    Message(ChatMessage),
    InviteAccepted(AcceptedInvite),
    InviteCode(String),
    Nickname(String),
    Cleared(usize),
    ActiveSession(Option<ActiveSession>),
    Listings(Vec<SessionListing>),
    Rooms(Vec<RoomView>),
    Session(Box<SessionView>),
    Messages(MessagePage),
    InvitePreview(InvitePreview),
    Summary(SessionSummary),
    Overview(FocusOverview),
    UserSessions(Vec<UserSessionEntry>),
    Heatmap(FocusHeatmap),
    Leaderboard(Vec<LeaderboardEntry>),
}

/// An error as seen by a remote caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&CoreError> for WireError {
    fn from(err: &CoreError) -> Self {
        let kind = err.kind();
        let message = match kind {
            // Storage details stay in the server log
            ErrorKind::Internal => "Internal error".to_string(),
            _ => err.to_string(),
        };
        Self { kind, message }
    }
}

impl From<WireError> for crate::Error {
    fn from(err: WireError) -> Self {
        crate::Error::Remote {
            kind: err.kind,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focusroom_core::{SessionStatus, TimeFilter};

    #[test]
    fn test_request_wire_shape() {
        let id = Uuid::new_v4();
        let frame = ClientFrame::Request {
            id: 7,
            request: Request::SendReaction {
                session_id: id,
                reaction: Reaction::Focus,
            },
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["id"], 7);
        assert_eq!(json["request"]["op"], "send_reaction");
        assert_eq!(json["request"]["session_id"], id.to_string());
    }

    #[test]
    fn test_request_defaults() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"op":"get_session_messages","session_id":"{}"}}"#, id);
        let request: Request = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            request,
            Request::GetSessionMessages {
                session_id: id,
                limit: DEFAULT_MESSAGE_PAGE
            }
        );

        let request: Request = serde_json::from_str(r#"{"op":"get_leaderboard"}"#).unwrap();
        match request {
            Request::GetLeaderboard { query } => assert_eq!(query.time_filter, TimeFilter::All),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_request_names_match_wire() {
        let requests = [
            Request::ClearFocusData,
            Request::GetFocusHeatmap { year: Some(2024) },
            Request::CreateSession {
                params: CreateSessionParams::new("Read", "history", 25, 30),
            },
        ];
        for request in requests {
            let json = serde_json::to_value(&request).unwrap();
            assert_eq!(json["op"], request.name());
        }
        assert!(!Request::GetMyRooms.is_mutation());
        assert!(Request::ClearFocusData.is_mutation());
    }

    #[test]
    fn test_validate_at_boundary() {
        let id = Uuid::new_v4();
        let blank = Request::SendMessage {
            session_id: id,
            content: "   ".into(),
        };
        assert!(matches!(blank.validate(), Err(CoreError::Validation(_))));

        let inverted = Request::CreateSession {
            params: CreateSessionParams::new("Read", "history", 40, 30),
        };
        assert!(inverted.validate().is_err());

        let oversized = Request::GetSessionMessages {
            session_id: id,
            limit: 5000,
        };
        assert!(oversized.validate().is_err());

        assert!(Request::UpdateRetentionPreference { retention_weeks: 0 }
            .validate()
            .is_err());
        assert!(Request::AcceptPrivateInvite {
            invite_code: " ".into()
        }
        .validate()
        .is_err());
        assert!(Request::GetSession { session_id: id }.validate().is_ok());
    }

    #[test]
    fn test_response_wire_shape() {
        let json = serde_json::to_value(Response::Prompt("Breathe".into())).unwrap();
        assert_eq!(json["kind"], "prompt");
        assert_eq!(json["data"], "Breathe");

        let json = serde_json::to_value(Response::Done).unwrap();
        assert_eq!(json["kind"], "done");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = CoreError::Io(std::io::Error::other("disk at /var/lib is full"));
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, ErrorKind::Internal);
        assert!(!wire.message.contains("/var/lib"));

        let err = CoreError::InvalidTransition {
            from: SessionStatus::Waiting,
            to: SessionStatus::Cooldown,
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, ErrorKind::InvalidTransition);
        assert!(wire.message.contains("waiting"));
    }
}
