//! Read-side views

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    check_page, ActiveSession, FocusHeatmap, FocusOverview, HeatmapDay, InvitePreview,
    LeaderboardEntry, LeaderboardQuery, MessagePage, MyParticipation, ParticipantView, RoomView,
    SessionListing, SessionService, SessionSummary, SessionView, SortBy, TimeFilter, Tx,
    UserSessionEntry,
};
use crate::access;
use crate::aggregator::{local_day, week_start};
use crate::error::{Error, Result};
use crate::models::{FocusLedger, FocusSession, Outcome, SessionParticipant, SessionStatus};

/// Leaderboard name for users without a nickname
pub const ANONYMOUS: &str = "Anonymous";

/// Whether viewing the summary should settle the viewer's own row
fn needs_finalize(session: &FocusSession, mine: Option<&SessionParticipant>) -> bool {
    let settling = matches!(
        session.status,
        SessionStatus::Cooldown | SessionStatus::Completed
    );
    settling && mine.map_or(false, |p| p.outcome.is_none() || !p.ledger_applied)
}

impl SessionService {
    /// The caller's current open participation, if any
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_active_session(&self, user_id: Uuid) -> Result<Option<ActiveSession>> {
        self.read(|tx| {
            let hashes = tx.ledgers().identities_for(user_id)?;
            for participant in tx.participants().list_for_hashes(&hashes)? {
                if !participant.is_active {
                    continue;
                }
                let session = tx.load_session(participant.session_id)?;
                if session.status.is_terminal() {
                    continue;
                }
                return Ok(Some(ActiveSession {
                    session_id: session.id,
                    status: session.status,
                    alias: participant.display_alias,
                    is_creator: session.is_creator(user_id),
                }));
            }
            Ok(None)
        })
    }

    /// Public rooms that are waiting, warming up or focusing
    #[instrument(skip(self))]
    pub fn get_active_sessions(&self) -> Result<Vec<SessionListing>> {
        let now = self.now();
        let sessions = self.read(|tx| tx.sessions().list_public_listed())?;
        Ok(sessions
            .iter()
            .map(|s| SessionListing::new(s, now))
            .collect())
    }

    /// Open rooms the caller created or is active in
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_my_rooms(&self, user_id: Uuid) -> Result<Vec<RoomView>> {
        let now = self.now();
        self.read(|tx| {
            let mut seen = HashSet::new();
            let mut rooms: Vec<FocusSession> = Vec::new();

            for session in tx.sessions().list_created_by(user_id)? {
                if !session.status.is_terminal() && seen.insert(session.id) {
                    rooms.push(session);
                }
            }
            let hashes = tx.ledgers().identities_for(user_id)?;
            for participant in tx.participants().list_for_hashes(&hashes)? {
                if !participant.is_active || seen.contains(&participant.session_id) {
                    continue;
                }
                let session = tx.load_session(participant.session_id)?;
                if !session.status.is_terminal() {
                    seen.insert(session.id);
                    rooms.push(session);
                }
            }

            rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(rooms
                .iter()
                .map(|session| {
                    let is_creator = session.is_creator(user_id);
                    RoomView {
                        listing: SessionListing::new(session, now),
                        is_creator,
                        invite_code: is_creator.then(|| session.invite_code.clone()),
                    }
                })
                .collect())
        })
    }

    /// Full room state with the server-authoritative timer
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_session(&self, user_id: Uuid, session_id: Uuid) -> Result<SessionView> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        self.read(|tx| {
            let session = tx.load_session(session_id)?;
            let participants = tx.participants().list_for_session(session_id)?;
            let mine = participants.iter().find(|p| p.identity_hash == hash);
            if !access::can_view(&session, user_id, &hash, mine.is_some()) {
                return Err(Error::NotFound("Session not found".into()));
            }

            let is_creator = session.is_creator(user_id);
            Ok(SessionView {
                listing: SessionListing::new(&session, now),
                min_duration: session.min_duration,
                max_duration: session.max_duration,
                repetitions: session.repetitions,
                break_duration: session.break_duration,
                break_interval: session.break_interval,
                current_repetition: session.current_repetition,
                started_at: session.started_at,
                ended_at: session.ended_at,
                is_creator,
                invite_code: is_creator.then(|| session.invite_code.clone()),
                participants: participants.iter().map(ParticipantView::from).collect(),
                me: mine.map(MyParticipation::from),
            })
        })
    }

    /// Latest chat messages, oldest first
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_session_messages(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        limit: u32,
    ) -> Result<MessagePage> {
        check_page(limit)?;
        let hash = self.identity(user_id, session_id);

        self.read(|tx| {
            let session = tx.load_session(session_id)?;
            let is_participant = tx.participants().find(session_id, &hash)?.is_some();
            if !is_participant && !session.is_creator(user_id) {
                return Err(Error::AuthorizationDenied(
                    "Only participants can read this chat".into(),
                ));
            }
            Ok(MessagePage {
                session_id,
                messages: tx.messages().list_recent(session_id, limit)?,
            })
        })
    }

    /// What an invite link points at
    #[instrument(skip(self, invite_code), fields(user_id = %user_id))]
    pub fn get_session_by_invite(&self, user_id: Uuid, invite_code: &str) -> Result<InvitePreview> {
        let code = invite_code.trim().to_ascii_uppercase();
        let session = self
            .read(|tx| tx.sessions().find_by_invite_code(&code))?
            .ok_or_else(|| Error::NotFound("Invite not found".into()))?;
        let hash = self.identity(user_id, session.id);

        Ok(InvitePreview {
            session_id: session.id,
            already_accepted: session.has_accepted(&hash),
            is_creator: session.is_creator(user_id),
            intent: session.intent,
            topic: session.topic,
            status: session.status,
            actual_duration: session.actual_duration,
            participant_count: session.participant_count,
            creator_display_name: session.creator_display_name,
            is_private: session.is_private,
        })
    }

    /// Recap; settles the caller's own row once the focus phase is over
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_session_summary(&self, user_id: Uuid, session_id: Uuid) -> Result<SessionSummary> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        let pending = self.read(|tx| {
            let session = tx.load_session(session_id)?;
            let mine = tx.participants().find(session_id, &hash)?;
            if !access::can_view(&session, user_id, &hash, mine.is_some()) {
                return Err(Error::NotFound("Session not found".into()));
            }
            Ok(needs_finalize(&session, mine.as_ref()))
        })?;

        if pending {
            let terminal = self.mutate(session_id, |tx, _| {
                self.finalize_viewer(tx, user_id, session_id, &hash)
            })?;
            if terminal {
                self.locks.release(session_id);
            }
        }

        self.read(|tx| {
            let session = tx.load_session(session_id)?;
            let participants = tx.participants().list_for_session(session_id)?;
            let mine = participants.iter().find(|p| p.identity_hash == hash);
            Ok(SessionSummary::new(&session, &participants, mine, now))
        })
    }

    /// The caller's ledger, or an empty one
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_focus_overview(&self, user_id: Uuid) -> Result<FocusOverview> {
        let now = self.now();
        let ledger = self
            .read(|tx| tx.ledgers().find(user_id))?
            .unwrap_or_else(|| FocusLedger::new(user_id, now));
        Ok(ledger.into())
    }

    /// Every session the caller took part in, newest first
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_user_sessions(&self, user_id: Uuid) -> Result<Vec<UserSessionEntry>> {
        self.read(|tx| {
            let hashes = tx.ledgers().identities_for(user_id)?;
            let mut entries = Vec::new();
            for participant in tx.participants().list_for_hashes(&hashes)? {
                let session = tx.load_session(participant.session_id)?;
                entries.push(UserSessionEntry {
                    session_id: session.id,
                    intent: session.intent,
                    topic: session.topic,
                    status: session.status,
                    alias: participant.display_alias,
                    joined_at: participant.joined_at,
                    actual_duration: session.actual_duration,
                    outcome: participant.outcome,
                });
            }
            Ok(entries)
        })
    }

    /// Daily activity for `year` (default: the current year)
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_focus_heatmap(&self, user_id: Uuid, year: Option<i32>) -> Result<FocusHeatmap> {
        let year = year.unwrap_or_else(|| local_day(self.now()).year());
        let invalid = || Error::Validation(format!("invalid year {}", year));
        let from = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
        let to = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(invalid)?;

        let days: Vec<HeatmapDay> = self
            .read(|tx| tx.ledgers().daily_between(user_id, from, to))?
            .into_iter()
            .map(HeatmapDay::from)
            .collect();

        Ok(FocusHeatmap {
            year,
            total_minutes: days.iter().map(|d| d.total_minutes).sum(),
            active_days: days.iter().filter(|d| d.session_count > 0).count() as u32,
            days,
        })
    }

    /// Ranked users; only nicknames are shown
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_leaderboard(
        &self,
        user_id: Uuid,
        query: LeaderboardQuery,
    ) -> Result<Vec<LeaderboardEntry>> {
        query.validate()?;
        let today = local_day(self.now());

        self.read(|tx| {
            let ledgers = tx.ledgers().list_all()?;
            let streaks: HashMap<Uuid, u32> = ledgers
                .iter()
                .map(|l| (l.user_id, l.focus_patterns.streak))
                .collect();

            // (user, minutes, sessions, streak)
            let mut rows: Vec<(Uuid, u32, u32, u32)> = match query.time_filter {
                TimeFilter::All => ledgers
                    .iter()
                    .map(|l| {
                        (
                            l.user_id,
                            l.total_focus_minutes,
                            l.total_sessions,
                            l.focus_patterns.streak,
                        )
                    })
                    .collect(),
                TimeFilter::Week | TimeFilter::Month => {
                    let from = if query.time_filter == TimeFilter::Week {
                        week_start(self.now())
                    } else {
                        today - Duration::days(i64::from(today.day0()))
                    };
                    tx.ledgers()
                        .totals_since(from)?
                        .into_iter()
                        .map(|t| {
                            let streak = streaks.get(&t.user_id).copied().unwrap_or(0);
                            (t.user_id, t.total_minutes, t.session_count, streak)
                        })
                        .collect()
                }
            };
            rows.retain(|r| r.2 > 0);
            rows.sort_by(|a, b| {
                let key = |r: &(Uuid, u32, u32, u32)| match query.sort_by {
                    SortBy::FocusMinutes => (r.1, r.2),
                    SortBy::Sessions => (r.2, r.1),
                    SortBy::Streak => (r.3, r.1),
                };
                key(b).cmp(&key(a))
            });

            let names = tx.profiles().nicknames()?;
            debug!(candidates = rows.len(), "Leaderboard ranked");
            Ok(rows
                .into_iter()
                .take(query.limit as usize)
                .enumerate()
                .map(|(i, (id, minutes, sessions, streak))| LeaderboardEntry {
                    rank: i as u32 + 1,
                    display_name: names
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| ANONYMOUS.to_string()),
                    focus_minutes: minutes,
                    sessions,
                    streak,
                    is_you: id == user_id,
                })
                .collect())
        })
    }

    /// Default the viewer's outcome to completed and credit it once.
    ///
    /// Returns whether the session is terminal.
    fn finalize_viewer(
        &self,
        tx: &Tx<'_>,
        user_id: Uuid,
        session_id: Uuid,
        hash: &str,
    ) -> Result<bool> {
        let now = self.now();
        let session = tx.load_session(session_id)?;
        let terminal = session.status.is_terminal();
        let Some(mut participant) = tx.participants().find(session_id, hash)? else {
            return Ok(terminal);
        };
        if !needs_finalize(&session, Some(&participant)) {
            return Ok(terminal);
        }

        let outcome = *participant.outcome.get_or_insert(Outcome::Completed);
        self.apply_ledger(tx, user_id, &session, &mut participant, outcome, now)?;
        tx.participants().update(&participant)?;
        Ok(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{harness, params};
    use super::super::CreateSessionParams;
    use super::*;

    #[test]
    fn test_timer_counts_down_from_start() {
        let h = harness();
        let creator = Uuid::new_v4();
        let created = h
            .service
            .create_session(creator, CreateSessionParams::new("Proofs", "math", 25, 30))
            .unwrap();
        assert!((25..=30).contains(&created.actual_duration));
        h.service.skip_warmup(creator, created.session_id).unwrap();

        let target = u64::from(created.actual_duration) * 60;
        let view = h.service.get_session(creator, created.session_id).unwrap();
        let timer = view.listing.timer.unwrap();
        assert_eq!(timer.remaining_seconds, target);
        // Same instant, same answer
        let again = h.service.get_session(creator, created.session_id).unwrap();
        assert_eq!(again.listing.timer.unwrap().remaining_seconds, target);

        h.clock.advance(Duration::seconds(90));
        let later = h.service.get_session(creator, created.session_id).unwrap();
        assert_eq!(later.listing.timer.unwrap().remaining_seconds, target - 90);

        h.clock.advance(Duration::seconds(target as i64));
        let done = h.service.get_session(creator, created.session_id).unwrap();
        assert_eq!(done.listing.timer.unwrap().remaining_seconds, 0);
    }

    #[test]
    fn test_timer_freezes_after_end() {
        let h = harness();
        let creator = Uuid::new_v4();
        let id = h.create(creator);
        h.service.skip_warmup(creator, id).unwrap();
        h.clock.advance(Duration::minutes(10));
        h.service.end_session(creator, id).unwrap();
        h.clock.advance(Duration::minutes(30));

        let timer = h.service.get_session(creator, id).unwrap().listing.timer.unwrap();
        assert_eq!(timer.elapsed_seconds, 600);
    }

    #[test]
    fn test_private_session_visibility() {
        let h = harness();
        let creator = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let created = h.create_private(creator);

        assert!(matches!(
            h.service.get_session(stranger, created.session_id),
            Err(Error::NotFound(_))
        ));
        let own = h.service.get_session(creator, created.session_id).unwrap();
        assert!(own.is_creator);
        assert_eq!(own.invite_code.as_deref(), Some(created.invite_code.as_str()));

        h.service
            .accept_private_invite(stranger, &created.invite_code)
            .unwrap();
        let view = h.service.get_session(stranger, created.session_id).unwrap();
        assert!(view.invite_code.is_none());
        assert!(view.me.is_none());
    }

    #[test]
    fn test_directory_lists_public_open_sessions() {
        let h = harness();
        let public = h.create(Uuid::new_v4());
        h.create_private(Uuid::new_v4());
        let cancelled_creator = Uuid::new_v4();
        let cancelled = h.create(cancelled_creator);
        h.service.cancel_session(cancelled_creator, cancelled).unwrap();

        let listed: Vec<Uuid> = h
            .service
            .get_active_sessions()
            .unwrap()
            .into_iter()
            .map(|l| l.session_id)
            .collect();
        assert_eq!(listed, vec![public]);
    }

    #[test]
    fn test_active_session_follows_membership() {
        let h = harness();
        let member = Uuid::new_v4();
        let id = h.create(Uuid::new_v4());
        assert!(h.service.get_active_session(member).unwrap().is_none());

        let joined = h.service.join_session(member, id).unwrap();
        let active = h.service.get_active_session(member).unwrap().unwrap();
        assert_eq!(active.session_id, id);
        assert_eq!(active.alias, joined.alias);
        assert!(!active.is_creator);

        h.service.leave_session(member, id).unwrap();
        assert!(h.service.get_active_session(member).unwrap().is_none());
    }

    #[test]
    fn test_my_rooms() {
        let h = harness();
        let creator = Uuid::new_v4();
        let member = Uuid::new_v4();
        let id = h.create(creator);
        h.service.join_session(member, id).unwrap();

        let mine = h.service.get_my_rooms(creator).unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine[0].is_creator);
        assert!(mine[0].invite_code.is_some());

        let theirs = h.service.get_my_rooms(member).unwrap();
        assert_eq!(theirs.len(), 1);
        assert!(!theirs[0].is_creator);
        assert!(theirs[0].invite_code.is_none());
    }

    #[test]
    fn test_messages_page() {
        let h = harness();
        let creator = Uuid::new_v4();
        let id = h.create(creator);
        for i in 0..4 {
            h.service.send_message(creator, id, &format!("note {}", i)).unwrap();
        }

        let page = h.service.get_session_messages(creator, id, 2).unwrap();
        let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["note 2", "note 3"]);

        assert!(matches!(
            h.service.get_session_messages(creator, id, 101),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            h.service.get_session_messages(Uuid::new_v4(), id, 10),
            Err(Error::AuthorizationDenied(_))
        ));
    }

    #[test]
    fn test_invite_preview() {
        let h = harness();
        let creator = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let created = h.create_private(creator);

        let preview = h
            .service
            .get_session_by_invite(guest, &created.invite_code)
            .unwrap();
        assert_eq!(preview.session_id, created.session_id);
        assert!(!preview.already_accepted);
        assert!(preview.is_private);

        h.service.accept_private_invite(guest, &created.invite_code).unwrap();
        let preview = h
            .service
            .get_session_by_invite(guest, &created.invite_code)
            .unwrap();
        assert!(preview.already_accepted);

        assert!(matches!(
            h.service.get_session_by_invite(guest, "NOPE"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_summary_settles_viewer_once() {
        let h = harness();
        let creator = Uuid::new_v4();
        let member = Uuid::new_v4();
        let id = h.focusing(creator, member);
        h.service.end_session(creator, id).unwrap();

        let summary = h.service.get_session_summary(member, id).unwrap();
        assert_eq!(summary.status, SessionStatus::Cooldown);
        assert_eq!(summary.my_outcome, Some(Outcome::Completed));
        assert_eq!(summary.my_credited_minutes, Some(summary.actual_duration));
        assert_eq!(summary.completed_count, 1);

        h.service.get_session_summary(member, id).unwrap();
        h.service.complete_session(creator, id).unwrap();

        let overview = h.service.get_focus_overview(member).unwrap();
        assert_eq!(overview.total_sessions, 1);
        assert_eq!(overview.completed_sessions, 1);
        assert_eq!(overview.streak, 1);
    }

    #[test]
    fn test_summary_before_end_changes_nothing() {
        let h = harness();
        let creator = Uuid::new_v4();
        let id = h.focusing(creator, Uuid::new_v4());

        let summary = h.service.get_session_summary(creator, id).unwrap();
        assert!(summary.my_outcome.is_none());
        assert_eq!(h.service.get_focus_overview(creator).unwrap().total_sessions, 0);
    }

    #[test]
    fn test_overview_defaults() {
        let h = harness();
        let overview = h.service.get_focus_overview(Uuid::new_v4()).unwrap();
        assert_eq!(overview.total_focus_minutes, 0);
        assert_eq!(overview.retention_weeks, 12);
        assert!(overview.weekly_stats.is_empty());
    }

    #[test]
    fn test_user_sessions_history() {
        let h = harness();
        let user = Uuid::new_v4();
        let first = h.create(user);
        h.service.cancel_session(user, first).unwrap();
        let second = h.service.create_session(user, params()).unwrap().session_id;

        let history = h.service.get_user_sessions(user).unwrap();
        let ids: HashSet<Uuid> = history.iter().map(|e| e.session_id).collect();
        assert_eq!(ids, HashSet::from([first, second]));
        let cancelled = history.iter().find(|e| e.session_id == first).unwrap();
        assert_eq!(cancelled.outcome, Some(Outcome::Interrupted));
    }

    #[test]
    fn test_heatmap() {
        let h = harness();
        let creator = Uuid::new_v4();
        let id = h.focusing(creator, Uuid::new_v4());
        h.service.end_session(creator, id).unwrap();
        h.service.complete_session(creator, id).unwrap();

        let heatmap = h.service.get_focus_heatmap(creator, None).unwrap();
        assert_eq!(heatmap.active_days, 1);
        assert_eq!(heatmap.days[0].completed_count, 1);
        assert!(heatmap.total_minutes >= 25);

        let empty = h
            .service
            .get_focus_heatmap(creator, Some(heatmap.year - 1))
            .unwrap();
        assert!(empty.days.is_empty());
        assert!(matches!(
            h.service.get_focus_heatmap(creator, Some(i32::MAX)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_leaderboard_ranks_and_hides_identity() {
        let h = harness();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        h.service.update_nickname(alice, "alice_focus").unwrap();

        // Alice completes, Bob leaves early
        let id = h.focusing(alice, bob);
        h.service.leave_session(bob, id).unwrap();
        h.service.end_session(alice, id).unwrap();
        h.service.complete_session(alice, id).unwrap();

        let board = h
            .service
            .get_leaderboard(bob, LeaderboardQuery::default())
            .unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].display_name, "alice_focus");
        assert_eq!(board[0].rank, 1);
        assert!(!board[0].is_you);
        assert_eq!(board[1].display_name, ANONYMOUS);
        assert!(board[1].is_you);

        let weekly = h
            .service
            .get_leaderboard(
                alice,
                LeaderboardQuery {
                    time_filter: TimeFilter::Week,
                    sort_by: SortBy::Streak,
                    limit: 1,
                },
            )
            .unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].streak, 1);
        assert!(weekly[0].is_you);
    }
}
