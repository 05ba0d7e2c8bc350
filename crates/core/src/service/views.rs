//! Response shapes returned by the service
//!
//! Views never carry identity hashes or real user ids of other people.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::InviteAcceptance;
use crate::aggregator::credited_minutes;
use crate::models::{
    ChatMessage, DailyFocusActivity, FocusLedger, FocusSession, Outcome, Reaction,
    SessionParticipant, SessionStatus, WeeklyStat,
};
use crate::timer::{session_timer, TimerSnapshot};

/// Result of `create_session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub invite_code: String,
    pub actual_duration: u32,
    /// Creator's alias inside the new session
    pub alias: String,
}

/// Result of `join_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedSession {
    pub alias: String,
    pub rejoined: bool,
}

/// Result of `accept_private_invite`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedInvite {
    pub session_id: Uuid,
    pub newly_accepted: bool,
}

impl AcceptedInvite {
    pub(crate) fn new(session_id: Uuid, acceptance: InviteAcceptance) -> Self {
        Self {
            session_id,
            newly_accepted: acceptance == InviteAcceptance::Accepted,
        }
    }
}

/// Result of `complete_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSession {
    /// Participants whose outcome was defaulted to completed
    pub finalized: u32,
}

/// Public directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListing {
    pub session_id: Uuid,
    pub intent: String,
    pub topic: String,
    pub status: SessionStatus,
    pub actual_duration: u32,
    pub participant_count: u32,
    pub matching_tags: Vec<String>,
    pub creator_display_name: String,
    pub is_private: bool,
    pub chat_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub timer: Option<TimerSnapshot>,
}

impl SessionListing {
    pub fn new(session: &FocusSession, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id,
            intent: session.intent.clone(),
            topic: session.topic.clone(),
            status: session.status,
            actual_duration: session.actual_duration,
            participant_count: session.participant_count,
            matching_tags: session.matching_tags.clone(),
            creator_display_name: session.creator_display_name.clone(),
            is_private: session.is_private,
            chat_enabled: session.chat_enabled,
            created_at: session.created_at,
            timer: session_timer(session, now),
        }
    }
}

/// A room the caller created or is taking part in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    #[serde(flatten)]
    pub listing: SessionListing,
    pub is_creator: bool,
    pub invite_code: Option<String>,
}

/// The caller's current participation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub alias: String,
    pub is_creator: bool,
}

/// Another participant as seen by the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub alias: String,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub last_reaction: Option<Reaction>,
}

impl From<&SessionParticipant> for ParticipantView {
    fn from(p: &SessionParticipant) -> Self {
        Self {
            alias: p.display_alias.clone(),
            is_active: p.is_active,
            joined_at: p.joined_at,
            left_at: p.left_at,
            last_reaction: p.last_reaction,
        }
    }
}

/// The caller's own row, including its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyParticipation {
    pub alias: String,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub last_reaction: Option<Reaction>,
    pub outcome: Option<Outcome>,
}

impl From<&SessionParticipant> for MyParticipation {
    fn from(p: &SessionParticipant) -> Self {
        Self {
            alias: p.display_alias.clone(),
            is_active: p.is_active,
            joined_at: p.joined_at,
            last_reaction: p.last_reaction,
            outcome: p.outcome,
        }
    }
}

/// Full room state for `get_session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub listing: SessionListing,
    pub min_duration: u32,
    pub max_duration: u32,
    pub repetitions: u32,
    pub break_duration: u32,
    pub break_interval: u32,
    pub current_repetition: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_creator: bool,
    /// Only shown to the creator
    pub invite_code: Option<String>,
    pub participants: Vec<ParticipantView>,
    pub me: Option<MyParticipation>,
}

/// Invite landing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitePreview {
    pub session_id: Uuid,
    pub intent: String,
    pub topic: String,
    pub status: SessionStatus,
    pub actual_duration: u32,
    pub participant_count: u32,
    pub creator_display_name: String,
    pub is_private: bool,
    pub is_creator: bool,
    pub already_accepted: bool,
}

/// Post-session recap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub intent: String,
    pub topic: String,
    pub status: SessionStatus,
    pub actual_duration: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub timer: Option<TimerSnapshot>,
    pub total_participants: u32,
    pub completed_count: u32,
    pub partial_count: u32,
    pub interrupted_count: u32,
    pub my_outcome: Option<Outcome>,
    pub my_credited_minutes: Option<u32>,
}

impl SessionSummary {
    pub(crate) fn new(
        session: &FocusSession,
        participants: &[SessionParticipant],
        mine: Option<&SessionParticipant>,
        now: DateTime<Utc>,
    ) -> Self {
        let count = |outcome: Outcome| {
            participants
                .iter()
                .filter(|p| p.outcome == Some(outcome))
                .count() as u32
        };
        let my_outcome = mine.and_then(|p| p.outcome);

        Self {
            session_id: session.id,
            intent: session.intent.clone(),
            topic: session.topic.clone(),
            status: session.status,
            actual_duration: session.actual_duration,
            started_at: session.started_at,
            ended_at: session.ended_at,
            timer: session_timer(session, now),
            total_participants: participants.len() as u32,
            completed_count: count(Outcome::Completed),
            partial_count: count(Outcome::Partial),
            interrupted_count: count(Outcome::Interrupted),
            my_outcome,
            my_credited_minutes: my_outcome
                .filter(|_| session.status.focus_started())
                .map(|o| credited_minutes(session.actual_duration, o)),
        }
    }
}

/// Ledger overview for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusOverview {
    pub total_focus_minutes: u32,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    pub avg_completion_rate: f64,
    pub streak: u32,
    pub top_topics: Vec<String>,
    pub preferred_duration_range: Option<(u32, u32)>,
    pub last_active_date: Option<DateTime<Utc>>,
    pub retention_weeks: u32,
    pub weekly_stats: Vec<WeeklyStat>,
}

impl From<FocusLedger> for FocusOverview {
    fn from(ledger: FocusLedger) -> Self {
        Self {
            total_focus_minutes: ledger.total_focus_minutes,
            total_sessions: ledger.total_sessions,
            completed_sessions: ledger.completed_sessions,
            avg_completion_rate: ledger.focus_patterns.avg_completion_rate,
            streak: ledger.focus_patterns.streak,
            top_topics: ledger.focus_patterns.top_topics,
            preferred_duration_range: ledger.focus_patterns.preferred_duration_range,
            last_active_date: ledger.focus_patterns.last_active_date,
            retention_weeks: ledger.retention_weeks,
            weekly_stats: ledger.weekly_stats,
        }
    }
}

/// One row of the caller's session history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSessionEntry {
    pub session_id: Uuid,
    pub intent: String,
    pub topic: String,
    pub status: SessionStatus,
    pub alias: String,
    pub joined_at: DateTime<Utc>,
    pub actual_duration: u32,
    pub outcome: Option<Outcome>,
}

/// Calendar heatmap for one year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusHeatmap {
    pub year: i32,
    pub days: Vec<HeatmapDay>,
    pub total_minutes: u32,
    pub active_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapDay {
    pub day: NaiveDate,
    pub session_count: u32,
    pub total_minutes: u32,
    pub completed_count: u32,
}

impl From<DailyFocusActivity> for HeatmapDay {
    fn from(activity: DailyFocusActivity) -> Self {
        Self {
            day: activity.day,
            session_count: activity.session_count,
            total_minutes: activity.total_minutes,
            completed_count: activity.completed_count,
        }
    }
}

/// Leaderboard row; names come from nicknames only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub display_name: String,
    pub focus_minutes: u32,
    pub sessions: u32,
    pub streak: u32,
    pub is_you: bool,
}

/// Chat history page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub session_id: Uuid,
    pub messages: Vec<ChatMessage>,
}
