//! Invite codes and private-session join rules

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::FocusSession;

/// Length of generated invite codes
pub const INVITE_CODE_LEN: usize = 10;

/// Generate a random invite code
pub fn generate_invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

/// What `accept_private_invite` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteAcceptance {
    /// Public session, nothing to record
    Public,
    /// Creator never needs an invite
    Creator,
    AlreadyAccepted,
    /// Identity hash appended to the accepted set
    Accepted,
}

/// Record `identity_hash` as accepted on `session` (set semantics)
pub fn accept_invite(
    session: &mut FocusSession,
    user_id: Uuid,
    identity_hash: &str,
) -> InviteAcceptance {
    if !session.is_private {
        return InviteAcceptance::Public;
    }
    if session.is_creator(user_id) {
        return InviteAcceptance::Creator;
    }
    if session.has_accepted(identity_hash) {
        return InviteAcceptance::AlreadyAccepted;
    }
    session
        .accepted_identity_hashes
        .push(identity_hash.to_string());
    InviteAcceptance::Accepted
}

/// Gate a first-time join. Fails closed for private sessions.
pub fn check_new_join(session: &FocusSession, user_id: Uuid, identity_hash: &str) -> Result<()> {
    if !session.status.accepts_new_participants() {
        return Err(Error::Conflict(
            "Session is not accepting new participants".into(),
        ));
    }
    if session.is_private && !session.is_creator(user_id) && !session.has_accepted(identity_hash) {
        return Err(Error::AuthorizationDenied(
            "This session is private; accept the invite first".into(),
        ));
    }
    Ok(())
}

/// Whether a caller may see a session's full state
pub fn can_view(session: &FocusSession, user_id: Uuid, identity_hash: &str, is_participant: bool) -> bool {
    !session.is_private
        || session.is_creator(user_id)
        || is_participant
        || session.has_accepted(identity_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use chrono::Utc;

    fn make_session(is_private: bool) -> FocusSession {
        FocusSession {
            id: Uuid::new_v4(),
            intent: "Write chapter two".into(),
            topic: "writing".into(),
            min_duration: 25,
            max_duration: 30,
            actual_duration: 25,
            repetitions: 1,
            break_duration: 5,
            break_interval: 1,
            current_repetition: 0,
            status: SessionStatus::Waiting,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            creator_id: Uuid::new_v4(),
            participant_count: 1,
            matching_tags: Vec::new(),
            is_private,
            invite_code: generate_invite_code(),
            accepted_identity_hashes: Vec::new(),
            chat_enabled: true,
            creator_display_name: "Calm Otter 1".into(),
        }
    }

    #[test]
    fn test_invite_code_shape() {
        let code = generate_invite_code();
        assert_eq!(code.len(), INVITE_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_accept_is_set_semantics() {
        let mut session = make_session(true);
        let user = Uuid::new_v4();

        assert_eq!(accept_invite(&mut session, user, "abc"), InviteAcceptance::Accepted);
        assert_eq!(
            accept_invite(&mut session, user, "abc"),
            InviteAcceptance::AlreadyAccepted
        );
        assert_eq!(session.accepted_identity_hashes, vec!["abc".to_string()]);
    }

    #[test]
    fn test_accept_noop_for_public_and_creator() {
        let mut public = make_session(false);
        assert_eq!(
            accept_invite(&mut public, Uuid::new_v4(), "abc"),
            InviteAcceptance::Public
        );

        let mut private = make_session(true);
        let creator = private.creator_id;
        assert_eq!(
            accept_invite(&mut private, creator, "abc"),
            InviteAcceptance::Creator
        );
        assert!(private.accepted_identity_hashes.is_empty());
    }

    #[test]
    fn test_private_join_fails_closed() {
        let mut session = make_session(true);
        let user = Uuid::new_v4();

        assert!(matches!(
            check_new_join(&session, user, "abc"),
            Err(Error::AuthorizationDenied(_))
        ));

        accept_invite(&mut session, user, "abc");
        assert!(check_new_join(&session, user, "abc").is_ok());
        assert!(check_new_join(&session, session.creator_id, "creator-hash").is_ok());
    }

    #[test]
    fn test_no_new_joins_after_focus_starts() {
        let mut session = make_session(false);
        session.status = SessionStatus::Focusing;
        assert!(matches!(
            check_new_join(&session, Uuid::new_v4(), "abc"),
            Err(Error::Conflict(_))
        ));
    }
}
