//! Session lifecycle state machine
//!
//! ```text
//! waiting --startWarmup--> warmup --startSession|skipWarmup--> focusing
//! waiting --skipWarmup-------------------------------------> focusing
//! focusing --end--> cooldown --complete--> completed
//! waiting|warmup|focusing --cancel--> cancelled
//! ```

use crate::error::{Error, Result};
use crate::models::SessionStatus;

/// Requests that move a session along its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartWarmup,
    SkipWarmup,
    StartSession,
    End,
    Complete,
    Cancel,
}

impl Transition {
    /// Target status of this transition
    pub fn target(&self) -> SessionStatus {
        match self {
            Transition::StartWarmup => SessionStatus::Warmup,
            Transition::SkipWarmup | Transition::StartSession => SessionStatus::Focusing,
            Transition::End => SessionStatus::Cooldown,
            Transition::Complete => SessionStatus::Completed,
            Transition::Cancel => SessionStatus::Cancelled,
        }
    }

    /// Only the session creator may drive these
    pub fn requires_creator(&self) -> bool {
        matches!(
            self,
            Transition::StartWarmup
                | Transition::SkipWarmup
                | Transition::StartSession
                | Transition::End
                | Transition::Cancel
        )
    }
}

/// Check whether `transition` is legal from `from`
pub fn is_allowed(from: SessionStatus, transition: Transition) -> bool {
    use SessionStatus::*;

    matches!(
        (from, transition),
        (Waiting, Transition::StartWarmup)
            | (Waiting, Transition::SkipWarmup)
            | (Warmup, Transition::StartSession)
            | (Warmup, Transition::SkipWarmup)
            | (Focusing, Transition::End)
            | (Cooldown, Transition::Complete)
            | (Waiting | Warmup | Focusing, Transition::Cancel)
    )
}

/// Resolve the next status, rejecting illegal moves
pub fn next_status(from: SessionStatus, transition: Transition) -> Result<SessionStatus> {
    let to = transition.target();
    if is_allowed(from, transition) {
        Ok(to)
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: &[SessionStatus] = &[
        SessionStatus::Waiting,
        SessionStatus::Warmup,
        SessionStatus::Focusing,
        SessionStatus::Break,
        SessionStatus::Cooldown,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
    ];

    const ALL_TRANSITIONS: &[Transition] = &[
        Transition::StartWarmup,
        Transition::SkipWarmup,
        Transition::StartSession,
        Transition::End,
        Transition::Complete,
        Transition::Cancel,
    ];

    #[test]
    fn test_happy_path() {
        let s = next_status(SessionStatus::Waiting, Transition::StartWarmup).unwrap();
        let s = next_status(s, Transition::StartSession).unwrap();
        let s = next_status(s, Transition::End).unwrap();
        let s = next_status(s, Transition::Complete).unwrap();
        assert_eq!(s, SessionStatus::Completed);
    }

    #[test]
    fn test_skip_warmup_from_waiting() {
        assert_eq!(
            next_status(SessionStatus::Waiting, Transition::SkipWarmup).unwrap(),
            SessionStatus::Focusing
        );
    }

    #[test]
    fn test_start_session_requires_warmup() {
        let err = next_status(SessionStatus::Waiting, Transition::StartSession).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: SessionStatus::Waiting,
                to: SessionStatus::Focusing
            }
        ));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [SessionStatus::Completed, SessionStatus::Cancelled] {
            for t in ALL_TRANSITIONS {
                assert!(!is_allowed(from, *t), "{:?} should not leave {}", t, from);
            }
        }
    }

    #[test]
    fn test_status_never_moves_backward() {
        let rank = |s: SessionStatus| match s {
            SessionStatus::Waiting => 0,
            SessionStatus::Warmup => 1,
            SessionStatus::Focusing => 2,
            SessionStatus::Break => 3,
            SessionStatus::Cooldown => 4,
            SessionStatus::Completed | SessionStatus::Cancelled => 5,
        };

        for from in ALL_STATUSES {
            for t in ALL_TRANSITIONS {
                if let Ok(to) = next_status(*from, *t) {
                    assert!(rank(to) > rank(*from), "{} -> {} moved backward", from, to);
                }
            }
        }
    }

    #[test]
    fn test_cancel_only_before_cooldown() {
        assert!(is_allowed(SessionStatus::Focusing, Transition::Cancel));
        assert!(!is_allowed(SessionStatus::Cooldown, Transition::Cancel));
    }
}
