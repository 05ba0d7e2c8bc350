//! Request routing onto the session service

use focusroom_core::{Result, SessionService, UserInfo};

use crate::protocol::{Request, Response};

/// Run `request` as `user`. Blocking; call from a blocking thread.
pub fn dispatch(service: &SessionService, user: &UserInfo, request: Request) -> Result<Response> {
    let me = user.user_id;

    let response = match request {
        Request::CreateSession { params } => Response::Created(service.create_session(me, params)?),
        Request::JoinSession { session_id } => {
            Response::Joined(service.join_session(me, session_id)?)
        }
        Request::LeaveSession { session_id } => {
            service.leave_session(me, session_id)?;
            Response::Done
        }
        Request::StartWarmup { session_id } => {
            Response::Prompt(service.start_warmup(me, session_id)?)
        }
        Request::SkipWarmup { session_id } => Response::Timer(service.skip_warmup(me, session_id)?),
        Request::StartSession { session_id } => {
            Response::Timer(service.start_session(me, session_id)?)
        }
        Request::EndSession { session_id } => Response::Prompt(service.end_session(me, session_id)?),
        Request::CompleteSession { session_id } => {
            Response::Completed(service.complete_session(me, session_id)?)
        }
        Request::CancelSession { session_id } => {
            service.cancel_session(me, session_id)?;
            Response::Done
        }
        Request::SendReaction {
            session_id,
            reaction,
        } => {
            service.send_reaction(me, session_id, reaction)?;
            Response::Done
        }
        Request::RecordOutcome {
            session_id,
            outcome,
        } => {
            service.record_outcome(me, session_id, outcome)?;
            Response::Done
        }
        Request::SendMessage {
            session_id,
            content,
        } => Response::Message(service.send_message(me, session_id, &content)?),
        Request::ToggleChat {
            session_id,
            enabled,
        } => {
            service.toggle_chat(me, session_id, enabled)?;
            Response::Done
        }
        Request::AcceptPrivateInvite { invite_code } => {
            Response::InviteAccepted(service.accept_private_invite(me, &invite_code)?)
        }
        Request::RegenerateInviteCode { session_id } => {
            Response::InviteCode(service.regenerate_invite_code(me, session_id)?)
        }
        Request::UpdateRetentionPreference { retention_weeks } => {
            service.update_retention_preference(me, retention_weeks)?;
            Response::Done
        }
        Request::ClearFocusData => Response::Cleared(service.clear_focus_data(me)?),
        Request::UpdateNickname { nickname } => {
            Response::Nickname(service.update_nickname(me, &nickname)?)
        }

        Request::GetActiveSession => Response::ActiveSession(service.get_active_session(me)?),
        Request::GetActiveSessions => Response::Listings(service.get_active_sessions()?),
        Request::GetMyRooms => Response::Rooms(service.get_my_rooms(me)?),
        Request::GetSession { session_id } => {
            Response::Session(Box::new(service.get_session(me, session_id)?))
        }
        Request::GetSessionMessages { session_id, limit } => {
            Response::Messages(service.get_session_messages(me, session_id, limit)?)
        }
        Request::GetSessionByInvite { invite_code } => {
            Response::InvitePreview(service.get_session_by_invite(me, &invite_code)?)
        }
        Request::GetSessionSummary { session_id } => {
            Response::Summary(service.get_session_summary(me, session_id)?)
        }
        Request::GetFocusOverview => Response::Overview(service.get_focus_overview(me)?),
        Request::GetUserSessions => Response::UserSessions(service.get_user_sessions(me)?),
        Request::GetFocusHeatmap { year } => {
            Response::Heatmap(service.get_focus_heatmap(me, year)?)
        }
        Request::GetLeaderboard { query } => {
            Response::Leaderboard(service.get_leaderboard(me, query)?)
        }
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use focusroom_core::{CreateSessionParams, Database, Error, IdentityHasher, SessionStatus};
    use uuid::Uuid;

    fn service() -> SessionService {
        SessionService::new(
            Database::open_in_memory().unwrap(),
            IdentityHasher::new("dispatch-test"),
        )
    }

    fn create(service: &SessionService, user: &UserInfo) -> Uuid {
        let request = Request::CreateSession {
            params: CreateSessionParams::new("Sketch the layout", "design", 25, 30),
        };
        match dispatch(service, user, request).unwrap() {
            Response::Created(created) => created.session_id,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_through_dispatch() {
        let service = service();
        let host = UserInfo::new(Uuid::new_v4());
        let guest = UserInfo::new(Uuid::new_v4());
        let id = create(&service, &host);

        let joined = dispatch(&service, &guest, Request::JoinSession { session_id: id }).unwrap();
        assert!(matches!(joined, Response::Joined(ref j) if !j.rejoined));

        let prompt = dispatch(&service, &host, Request::StartWarmup { session_id: id }).unwrap();
        assert!(matches!(prompt, Response::Prompt(ref p) if p.contains("Sketch the layout")));

        let timer = dispatch(&service, &host, Request::StartSession { session_id: id }).unwrap();
        match timer {
            Response::Timer(snapshot) => {
                assert_eq!(snapshot.target_duration_minutes, 27);
                assert!(snapshot.remaining_seconds <= 27 * 60);
            }
            other => panic!("unexpected {:?}", other),
        }

        match dispatch(&service, &guest, Request::GetSession { session_id: id }).unwrap() {
            Response::Session(view) => assert_eq!(view.listing.status, SessionStatus::Focusing),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_errors_pass_through() {
        let service = service();
        let host = UserInfo::new(Uuid::new_v4());
        let guest = UserInfo::new(Uuid::new_v4());
        let id = create(&service, &host);

        let result = dispatch(&service, &guest, Request::CancelSession { session_id: id });
        assert!(matches!(result, Err(Error::AuthorizationDenied(_))));

        let result = dispatch(
            &service,
            &host,
            Request::GetSession {
                session_id: Uuid::new_v4(),
            },
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_user_scoped_queries() {
        let service = service();
        let host = UserInfo::new(Uuid::new_v4());
        let id = create(&service, &host);

        match dispatch(&service, &host, Request::GetActiveSession).unwrap() {
            Response::ActiveSession(Some(active)) => assert_eq!(active.session_id, id),
            other => panic!("unexpected {:?}", other),
        }
        match dispatch(&service, &host, Request::GetMyRooms).unwrap() {
            Response::Rooms(rooms) => assert_eq!(rooms.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
