//! State-changing operations

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    validate_message, validate_nickname, validate_retention, AcceptedInvite, CompletedSession,
    CreateSessionParams, CreatedSession, JoinedSession, Outbox, SessionService, Tx,
};
use crate::access::{self, generate_invite_code, InviteAcceptance};
use crate::aggregator;
use crate::error::{Error, Result};
use crate::events::SessionEventKind;
use crate::identity::generate_alias;
use crate::lifecycle::{self, Transition};
use crate::models::{
    ChatMessage, FocusLedger, FocusSession, Outcome, Reaction, SessionParticipant, SessionStatus,
};
use crate::prompts::{DurationContext, PromptContext};
use crate::timer::{session_timer, TimerSnapshot};

/// Attempts at drawing an alias not already used in the room
const ALIAS_ATTEMPTS: usize = 8;

fn already_active() -> Error {
    Error::Conflict("You are already active in another session".into())
}

fn require_creator(session: &FocusSession, user_id: Uuid) -> Result<()> {
    if session.is_creator(user_id) {
        Ok(())
    } else {
        Err(Error::AuthorizationDenied(
            "Only the session creator can do that".into(),
        ))
    }
}

fn require_open(session: &FocusSession) -> Result<()> {
    if session.status.is_terminal() {
        return Err(Error::Conflict("Session has already ended".into()));
    }
    Ok(())
}

fn prompt_context(session: &FocusSession) -> PromptContext<'_> {
    PromptContext {
        intent: &session.intent,
        topic: &session.topic,
        duration_minutes: session.actual_duration,
    }
}

/// Whether the row's last leave came before the focus phase began
fn left_before_focus(session: &FocusSession, participant: &SessionParticipant) -> bool {
    match (participant.left_at, session.started_at) {
        (Some(left), Some(started)) => left < started,
        _ => true,
    }
}

fn fresh_alias(taken: &[SessionParticipant]) -> String {
    let mut alias = generate_alias();
    for _ in 0..ALIAS_ATTEMPTS {
        if !taken.iter().any(|p| p.display_alias == alias) {
            break;
        }
        alias = generate_alias();
    }
    alias
}

impl SessionService {
    /// Create a room; the creator joins it immediately
    #[instrument(skip(self, params), fields(user_id = %user_id))]
    pub fn create_session(
        &self,
        user_id: Uuid,
        params: CreateSessionParams,
    ) -> Result<CreatedSession> {
        params.validate()?;
        let now = self.now();
        let intent = params.intent.trim().to_string();
        let topic = params.topic.trim().to_string();

        let history = self.read(|tx| tx.ledgers().find(user_id))?;
        let actual_duration = self.prompts.choose_duration(&DurationContext {
            topic: &topic,
            min_duration: params.min_duration,
            max_duration: params.max_duration,
            history: history.as_ref(),
        });
        let matching_tags = self.prompts.matching_tags(&PromptContext {
            intent: &intent,
            topic: &topic,
            duration_minutes: actual_duration,
        });

        let alias = generate_alias();
        let session = FocusSession {
            id: Uuid::new_v4(),
            intent,
            topic,
            min_duration: params.min_duration,
            max_duration: params.max_duration,
            actual_duration,
            repetitions: params.repetitions(),
            break_duration: params.break_duration(),
            break_interval: params.break_interval(),
            current_repetition: 0,
            status: SessionStatus::Waiting,
            created_at: now,
            started_at: None,
            ended_at: None,
            creator_id: user_id,
            participant_count: 0,
            matching_tags,
            is_private: params.is_private,
            invite_code: generate_invite_code(),
            accepted_identity_hashes: Vec::new(),
            chat_enabled: params.chat_enabled,
            creator_display_name: alias.clone(),
        };
        let session_id = session.id;

        let result = self.mutate(session_id, |tx, _| {
            if self.active_elsewhere(tx, user_id, None)? {
                return Err(already_active());
            }
            tx.sessions().create(&session)?;

            let hash = self.identity(user_id, session_id);
            tx.participants()
                .insert(&SessionParticipant::new(session_id, hash.clone(), alias.clone(), now))?;
            tx.ledgers().register_identity(&hash, user_id)?;
            tx.sessions().refresh_participant_count(session_id)?;
            self.check_invariants(tx, &session)?;

            Ok(CreatedSession {
                session_id,
                invite_code: session.invite_code.clone(),
                actual_duration,
                alias: alias.clone(),
            })
        });

        match &result {
            Ok(_) => info!(
                session_id = %session_id,
                actual_duration,
                is_private = session.is_private,
                "Session created"
            ),
            Err(_) => self.locks.release(session_id),
        }
        result
    }

    /// Join or rejoin a room
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn join_session(&self, user_id: Uuid, session_id: Uuid) -> Result<JoinedSession> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        self.mutate(session_id, |tx, outbox| {
            let session = tx.load_session(session_id)?;
            require_open(&session)?;

            let participants = tx.participants();
            let joined = match participants.find(session_id, &hash)? {
                Some(existing) if existing.is_active => {
                    return Ok(JoinedSession {
                        alias: existing.display_alias,
                        rejoined: true,
                    });
                }
                Some(mut existing) => {
                    if self.active_elsewhere(tx, user_id, Some(session_id))? {
                        return Err(already_active());
                    }
                    // A leave before focus settled the row without crediting it
                    if left_before_focus(&session, &existing) {
                        existing.ledger_applied = false;
                    }
                    existing.is_active = true;
                    existing.left_at = None;
                    existing.outcome = None;
                    participants.update(&existing)?;
                    JoinedSession {
                        alias: existing.display_alias,
                        rejoined: true,
                    }
                }
                None => {
                    access::check_new_join(&session, user_id, &hash)?;
                    if self.active_elsewhere(tx, user_id, Some(session_id))? {
                        return Err(already_active());
                    }
                    let alias = fresh_alias(&participants.list_for_session(session_id)?);
                    participants.insert(&SessionParticipant::new(
                        session_id,
                        hash.clone(),
                        alias.clone(),
                        now,
                    ))?;
                    tx.ledgers().register_identity(&hash, user_id)?;
                    JoinedSession {
                        alias,
                        rejoined: false,
                    }
                }
            };

            let participant_count = tx.sessions().refresh_participant_count(session_id)?;
            outbox.session(
                session_id,
                now,
                SessionEventKind::ParticipantJoined {
                    alias: joined.alias.clone(),
                    is_active: true,
                    participant_count,
                },
            );
            self.check_invariants(tx, &session)?;

            info!(
                session_id = %session_id,
                rejoined = joined.rejoined,
                participant_count,
                "Participant joined"
            );
            Ok(joined)
        })
    }

    /// Leave a room; idempotent once inactive
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn leave_session(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        self.mutate(session_id, |tx, outbox| {
            let session = tx.load_session(session_id)?;
            let mut participant = tx
                .participants()
                .find(session_id, &hash)?
                .ok_or_else(|| Error::NotFound("You are not in this session".into()))?;
            if !participant.is_active {
                return Ok(());
            }

            participant.is_active = false;
            participant.left_at = Some(now);
            let outcome = *participant.outcome.get_or_insert(Outcome::Interrupted);
            if session.status.focus_started() {
                self.apply_ledger(tx, user_id, &session, &mut participant, outcome, now)?;
            } else {
                participant.ledger_applied = true;
            }
            tx.participants().update(&participant)?;

            let participant_count = tx.sessions().refresh_participant_count(session_id)?;
            outbox.session(
                session_id,
                now,
                SessionEventKind::ParticipantLeft {
                    alias: participant.display_alias.clone(),
                    is_active: false,
                    participant_count,
                },
            );
            self.check_invariants(tx, &session)?;

            info!(session_id = %session_id, participant_count, "Participant left");
            Ok(())
        })
    }

    /// waiting -> warmup; returns the warmup prompt
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn start_warmup(&self, user_id: Uuid, session_id: Uuid) -> Result<String> {
        let session = self.creator_transition(user_id, session_id, Transition::StartWarmup)?;
        Ok(self.prompts.warmup_prompt(&prompt_context(&session)))
    }

    /// waiting|warmup -> focusing
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn skip_warmup(&self, user_id: Uuid, session_id: Uuid) -> Result<TimerSnapshot> {
        self.start_focus(user_id, session_id, Transition::SkipWarmup)
    }

    /// warmup -> focusing
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn start_session(&self, user_id: Uuid, session_id: Uuid) -> Result<TimerSnapshot> {
        self.start_focus(user_id, session_id, Transition::StartSession)
    }

    /// focusing -> cooldown; returns the cooldown prompt
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn end_session(&self, user_id: Uuid, session_id: Uuid) -> Result<String> {
        let session = self.creator_transition(user_id, session_id, Transition::End)?;
        Ok(self.prompts.cooldown_prompt(&prompt_context(&session)))
    }

    /// cooldown -> completed; active participants default to `completed`
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn complete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<CompletedSession> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        let completed = self.mutate(session_id, |tx, outbox| {
            let mut session = tx.load_session(session_id)?;
            let is_participant = tx.participants().find(session_id, &hash)?.is_some();
            if !session.is_creator(user_id) && !is_participant {
                return Err(Error::AuthorizationDenied(
                    "Only participants can complete a session".into(),
                ));
            }
            self.advance(tx, &mut session, Transition::Complete, now, outbox)?;

            let mut finalized = 0;
            for mut participant in tx.participants().list_for_session(session_id)? {
                if !participant.is_active {
                    continue;
                }
                if participant.outcome.is_none() {
                    participant.outcome = Some(Outcome::Completed);
                    finalized += 1;
                }
                let outcome = participant.outcome.unwrap_or(Outcome::Completed);
                self.apply_for_owner(tx, &session, &mut participant, outcome, now)?;
                tx.participants().update(&participant)?;
            }
            self.check_invariants(tx, &session)?;

            info!(session_id = %session_id, finalized, "Session completed");
            Ok(CompletedSession { finalized })
        })?;

        self.locks.release(session_id);
        Ok(completed)
    }

    /// waiting|warmup|focusing -> cancelled
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn cancel_session(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        let now = self.now();
        self.mutate(session_id, |tx, outbox| {
            let mut session = tx.load_session(session_id)?;
            require_creator(&session, user_id)?;
            self.cancel_locked(tx, &mut session, now, outbox)
        })?;

        self.locks.release(session_id);
        Ok(())
    }

    /// Cancel rooms stuck before focus for longer than `older_than`
    #[instrument(skip(self))]
    pub fn cancel_stale_sessions(&self, older_than: Duration) -> Result<Vec<Uuid>> {
        let now = self.now();
        let stale = self.read(|tx| {
            tx.sessions().list_stale(
                &[SessionStatus::Waiting, SessionStatus::Warmup],
                now - older_than,
            )
        })?;

        let mut cancelled = Vec::new();
        for candidate in stale {
            let changed = self.mutate(candidate.id, |tx, outbox| {
                let mut session = tx.load_session(candidate.id)?;
                if !session.status.accepts_new_participants() {
                    return Ok(false);
                }
                self.cancel_locked(tx, &mut session, now, outbox)?;
                Ok(true)
            })?;
            if changed {
                self.locks.release(candidate.id);
                cancelled.push(candidate.id);
            }
        }

        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "Cancelled stale sessions");
        }
        Ok(cancelled)
    }

    /// Set the caller's last reaction
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn send_reaction(&self, user_id: Uuid, session_id: Uuid, reaction: Reaction) -> Result<()> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        self.mutate(session_id, |tx, outbox| {
            tx.load_session(session_id)?;
            let mut participant = tx
                .participants()
                .find(session_id, &hash)?
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    Error::AuthorizationDenied("Join the session before reacting".into())
                })?;

            participant.last_reaction = Some(reaction);
            tx.participants().update(&participant)?;
            outbox.session(
                session_id,
                now,
                SessionEventKind::ParticipantReaction {
                    alias: participant.display_alias,
                    reaction,
                },
            );
            Ok(())
        })
    }

    /// Record the caller's own outcome once focus has started
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn record_outcome(&self, user_id: Uuid, session_id: Uuid, outcome: Outcome) -> Result<()> {
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        self.mutate(session_id, |tx, _| {
            let session = tx.load_session(session_id)?;
            if !session.status.focus_started() {
                return Err(Error::InvalidTransition {
                    from: session.status,
                    to: SessionStatus::Completed,
                });
            }
            let mut participant = tx
                .participants()
                .find(session_id, &hash)?
                .ok_or_else(|| Error::NotFound("You are not in this session".into()))?;
            if participant.outcome.is_some() && participant.ledger_applied {
                return Ok(());
            }

            let outcome = *participant.outcome.get_or_insert(outcome);
            self.apply_ledger(tx, user_id, &session, &mut participant, outcome, now)?;
            tx.participants().update(&participant)?;
            Ok(())
        })
    }

    /// Post to the room's chat topic
    #[instrument(skip(self, content), fields(user_id = %user_id))]
    pub fn send_message(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        content: &str,
    ) -> Result<ChatMessage> {
        let content = validate_message(content)?;
        let now = self.now();
        let hash = self.identity(user_id, session_id);

        self.mutate(session_id, |tx, outbox| {
            let session = tx.load_session(session_id)?;
            let participant = tx
                .participants()
                .find(session_id, &hash)?
                .filter(|p| p.is_active)
                .ok_or_else(|| Error::AuthorizationDenied("Join the session to chat".into()))?;
            if !session.chat_enabled {
                return Err(Error::AuthorizationDenied(
                    "Chat is disabled for this session".into(),
                ));
            }
            require_open(&session)?;

            let message = ChatMessage::new(session_id, participant.display_alias, content, now);
            tx.messages().create(&message)?;
            outbox.chat(
                session_id,
                now,
                SessionEventKind::Message {
                    message: message.clone(),
                },
            );
            Ok(message)
        })
    }

    /// Enable or disable chat (creator only)
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn toggle_chat(&self, user_id: Uuid, session_id: Uuid, enabled: bool) -> Result<()> {
        let now = self.now();
        self.mutate(session_id, |tx, outbox| {
            let mut session = tx.load_session(session_id)?;
            require_creator(&session, user_id)?;
            require_open(&session)?;
            if session.chat_enabled == enabled {
                return Ok(());
            }

            session.chat_enabled = enabled;
            tx.sessions().update(&session)?;
            outbox.session(session_id, now, SessionEventKind::ChatToggled { enabled });
            Ok(())
        })
    }

    /// Add the caller to a private room's accepted set
    #[instrument(skip(self, invite_code), fields(user_id = %user_id))]
    pub fn accept_private_invite(&self, user_id: Uuid, invite_code: &str) -> Result<AcceptedInvite> {
        let code = invite_code.trim().to_ascii_uppercase();
        let session_id = self
            .read(|tx| tx.sessions().find_by_invite_code(&code))?
            .ok_or_else(|| Error::NotFound("Invite not found".into()))?
            .id;
        let hash = self.identity(user_id, session_id);

        self.mutate(session_id, |tx, _| {
            let mut session = tx.load_session(session_id)?;
            // The code may have been regenerated since the lookup
            if session.invite_code != code {
                return Err(Error::NotFound("Invite not found".into()));
            }
            require_open(&session)?;

            let acceptance = access::accept_invite(&mut session, user_id, &hash);
            if acceptance == InviteAcceptance::Accepted {
                tx.sessions().update(&session)?;
                info!(session_id = %session_id, "Private invite accepted");
            }
            Ok(AcceptedInvite::new(session_id, acceptance))
        })
    }

    /// Issue a new invite code, invalidating the old one (creator only)
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn regenerate_invite_code(&self, user_id: Uuid, session_id: Uuid) -> Result<String> {
        self.mutate(session_id, |tx, _| {
            let mut session = tx.load_session(session_id)?;
            require_creator(&session, user_id)?;
            if !session.is_private {
                return Err(Error::Validation(
                    "Only private sessions use invite codes".into(),
                ));
            }
            require_open(&session)?;

            session.invite_code = generate_invite_code();
            tx.sessions().update(&session)?;
            Ok(session.invite_code)
        })
    }

    /// Change how many weeks of history the caller's ledger keeps
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn update_retention_preference(&self, user_id: Uuid, retention_weeks: u32) -> Result<()> {
        validate_retention(retention_weeks)?;
        let now = self.now();

        self.write(|tx| {
            let ledgers = tx.ledgers();
            let mut ledger = ledgers
                .find(user_id)?
                .unwrap_or_else(|| FocusLedger::new(user_id, now));
            ledger.retention_weeks = retention_weeks;
            aggregator::trim_retention(&mut ledger, now);
            aggregator::refresh_patterns(&mut ledger);
            ledger.last_updated = now;
            ledgers.save(&ledger)
        })
    }

    /// Delete every ledger row of the caller
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn clear_focus_data(&self, user_id: Uuid) -> Result<usize> {
        let removed = self.write(|tx| tx.ledgers().purge(user_id))?;
        info!(removed, "Focus data cleared");
        Ok(removed)
    }

    /// Set the caller's public nickname
    #[instrument(skip(self, nickname), fields(user_id = %user_id))]
    pub fn update_nickname(&self, user_id: Uuid, nickname: &str) -> Result<String> {
        let nickname = validate_nickname(nickname)?;
        let now = self.now();

        self.write(|tx| {
            let profiles = tx.profiles();
            match profiles.find_owner(&nickname)? {
                Some(owner) if owner != user_id => {
                    Err(Error::Conflict("Nickname is already taken".into()))
                }
                _ => {
                    profiles.set_nickname(user_id, &nickname, now)?;
                    Ok(nickname)
                }
            }
        })
    }

    fn start_focus(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        transition: Transition,
    ) -> Result<TimerSnapshot> {
        let now = self.now();
        let session = self.creator_transition(user_id, session_id, transition)?;
        session_timer(&session, now).ok_or_else(|| {
            Error::InvalidTransition {
                from: session.status,
                to: SessionStatus::Focusing,
            }
        })
    }

    fn creator_transition(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        transition: Transition,
    ) -> Result<FocusSession> {
        let now = self.now();
        self.mutate(session_id, |tx, outbox| {
            let mut session = tx.load_session(session_id)?;
            require_creator(&session, user_id)?;
            self.advance(tx, &mut session, transition, now, outbox)?;
            self.check_invariants(tx, &session)?;
            Ok(session)
        })
    }

    /// Move `session` along the lifecycle and announce it
    fn advance(
        &self,
        tx: &Tx<'_>,
        session: &mut FocusSession,
        transition: Transition,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let previous = session.status;
        let status = lifecycle::next_status(previous, transition)?;
        session.status = status;
        match status {
            SessionStatus::Focusing => {
                session.started_at = Some(now);
                session.current_repetition = 1;
            }
            SessionStatus::Cooldown | SessionStatus::Cancelled => session.ended_at = Some(now),
            SessionStatus::Completed => {
                session.ended_at.get_or_insert(now);
            }
            _ => {}
        }
        tx.sessions().update(session)?;

        let timer = if status == SessionStatus::Focusing {
            session_timer(session, now)
        } else {
            None
        };
        outbox.session(
            session.id,
            now,
            SessionEventKind::StatusChanged {
                status,
                previous_status: previous,
                timer,
            },
        );
        info!(session_id = %session.id, from = %previous, to = %status, "Session status changed");
        Ok(())
    }

    /// Cancel and close out every active participant
    fn cancel_locked(
        &self,
        tx: &Tx<'_>,
        session: &mut FocusSession,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let focus_started = session.status.focus_started();
        self.advance(tx, session, Transition::Cancel, now, outbox)?;

        for mut participant in tx.participants().list_for_session(session.id)? {
            if !participant.is_active {
                continue;
            }
            participant.is_active = false;
            participant.left_at = Some(now);
            let outcome = *participant.outcome.get_or_insert(Outcome::Interrupted);
            if focus_started {
                self.apply_for_owner(tx, session, &mut participant, outcome, now)?;
            } else {
                participant.ledger_applied = true;
            }
            tx.participants().update(&participant)?;
        }
        tx.sessions().refresh_participant_count(session.id)?;
        self.check_invariants(tx, session)
    }

    /// Ledger update for a row whose owner is known only by hash
    fn apply_for_owner(
        &self,
        tx: &Tx<'_>,
        session: &FocusSession,
        participant: &mut SessionParticipant,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if participant.ledger_applied {
            return Ok(());
        }
        let owner = tx
            .ledgers()
            .resolve_identity(&participant.identity_hash)?
            .ok_or_else(|| {
                warn!(session_id = %session.id, "Participant identity is not registered");
                Error::NotFound("Participant identity not registered".into())
            })?;
        self.apply_ledger(tx, owner, session, participant, outcome, now)?;
        Ok(())
    }
}
