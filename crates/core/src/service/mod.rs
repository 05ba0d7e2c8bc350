//! Session orchestration service
//!
//! Every mutation for a session runs under that session's lock and inside a
//! single database transaction. Events are published only after the commit,
//! still under the session lock, so subscribers see them in commit order.
//! Reads take the database lock only.

mod mutations;
mod params;
mod queries;
mod views;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregator::{self, local_day, Credit};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::events::{EventSink, NullSink, SessionEvent, SessionEventKind, Topic};
use crate::identity::IdentityHasher;
use crate::invariants;
use crate::models::{FocusLedger, FocusSession, Outcome, SessionParticipant};
use crate::prompts::PromptService;
use crate::storage::{
    Database, LedgerStore, MessageStore, ParticipantStore, ProfileStore, SessionStore,
};

pub use params::*;
pub use views::*;

/// Per-session mutexes
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn get(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(session_id).or_default().clone()
    }

    /// Forget the lock of a session that can no longer change
    fn release(&self, session_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(&session_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Events collected during a transaction, published after commit
#[derive(Default)]
pub(crate) struct Outbox {
    events: Vec<(Topic, SessionEvent)>,
}

impl Outbox {
    fn session(&mut self, session_id: Uuid, at: DateTime<Utc>, kind: SessionEventKind) {
        self.events.push((
            Topic::Session(session_id),
            SessionEvent::new(session_id, at, kind),
        ));
    }

    fn chat(&mut self, session_id: Uuid, at: DateTime<Utc>, kind: SessionEventKind) {
        self.events.push((
            Topic::Chat(session_id),
            SessionEvent::new(session_id, at, kind),
        ));
    }

    fn flush(self, sink: &dyn EventSink) {
        for (topic, event) in self.events {
            sink.publish(topic, event);
        }
    }
}

/// Stores bound to an open transaction
pub(crate) struct Tx<'c> {
    conn: &'c Connection,
}

impl<'c> Tx<'c> {
    fn sessions(&self) -> SessionStore<'c> {
        SessionStore::new(self.conn)
    }

    fn participants(&self) -> ParticipantStore<'c> {
        ParticipantStore::new(self.conn)
    }

    fn messages(&self) -> MessageStore<'c> {
        MessageStore::new(self.conn)
    }

    fn ledgers(&self) -> LedgerStore<'c> {
        LedgerStore::new(self.conn)
    }

    fn profiles(&self) -> ProfileStore<'c> {
        ProfileStore::new(self.conn)
    }

    fn load_session(&self, session_id: Uuid) -> Result<FocusSession> {
        self.sessions()
            .find_by_id(session_id)?
            .ok_or_else(|| Error::NotFound("Session not found".into()))
    }
}

/// The orchestration service behind every mutation and query
pub struct SessionService {
    db: Mutex<Database>,
    locks: SessionLocks,
    hasher: IdentityHasher,
    prompts: PromptService,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    /// Service with heuristic prompts, no event delivery and the system clock
    pub fn new(db: Database, hasher: IdentityHasher) -> Self {
        Self {
            db: Mutex::new(db),
            locks: SessionLocks::default(),
            hasher,
            prompts: PromptService::heuristic(),
            events: Arc::new(NullSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptService) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn identity(&self, user_id: Uuid, session_id: Uuid) -> String {
        self.hasher.hash(user_id, session_id)
    }

    /// Read-only access outside any session lock
    fn read<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let db = self.db();
        db.transaction(|conn| f(&Tx { conn }))
    }

    /// Per-user write that touches no session
    fn write<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let db = self.db();
        db.transaction(|conn| f(&Tx { conn }))
    }

    /// Serialized mutation of one session
    fn mutate<T>(
        &self,
        session_id: Uuid,
        f: impl FnOnce(&Tx<'_>, &mut Outbox) -> Result<T>,
    ) -> Result<T> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut outbox = Outbox::default();
        let value = {
            let db = self.db();
            db.transaction(|conn| f(&Tx { conn }, &mut outbox))?
        };
        outbox.flush(self.events.as_ref());
        Ok(value)
    }

    /// Whether `user_id` is active in any open session other than `except`
    fn active_elsewhere(&self, tx: &Tx<'_>, user_id: Uuid, except: Option<Uuid>) -> Result<bool> {
        for session_id in tx.sessions().list_open_ids()? {
            if Some(session_id) == except {
                continue;
            }
            let hash = self.identity(user_id, session_id);
            if tx.participants().is_active(session_id, &hash)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fold one participation into its owner's ledger, at most once per row
    fn apply_ledger(
        &self,
        tx: &Tx<'_>,
        user_id: Uuid,
        session: &FocusSession,
        participant: &mut SessionParticipant,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if participant.ledger_applied {
            return Ok(false);
        }

        let ledgers = tx.ledgers();
        let mut ledger = ledgers
            .find(user_id)?
            .unwrap_or_else(|| FocusLedger::new(user_id, now));
        let credit = Credit {
            topic: &session.topic,
            actual_duration: session.actual_duration,
            outcome,
        };
        aggregator::apply(&mut ledger, &credit, now);
        invariants::assert_ledger_invariants(&ledger, now);

        ledgers.save(&ledger)?;
        ledgers.record_daily(
            user_id,
            local_day(now),
            credit.minutes(),
            outcome == Outcome::Completed,
        )?;
        participant.ledger_applied = true;

        info!(
            session_id = %session.id,
            outcome = %outcome,
            minutes = credit.minutes(),
            "Ledger updated"
        );
        Ok(true)
    }

    /// Debug-only consistency checks after a write
    fn check_invariants(&self, tx: &Tx<'_>, session: &FocusSession) -> Result<()> {
        if cfg!(debug_assertions) {
            let stored = tx.load_session(session.id)?;
            invariants::assert_session_invariants(&stored);
            let participants = tx.participants().list_for_session(session.id)?;
            invariants::assert_participant_count(&stored, &participants);
            debug!(session_id = %session.id, "Invariants hold");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;

    /// Sink that keeps everything it was given
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<(Topic, SessionEvent)>>,
    }

    impl RecordingSink {
        pub fn kinds(&self) -> Vec<SessionEventKind> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, e)| e.kind.clone())
                .collect()
        }

        pub fn topics(&self) -> Vec<Topic> {
            self.events.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl EventSink for RecordingSink {
        fn publish(&self, topic: Topic, event: SessionEvent) {
            self.events.lock().unwrap().push((topic, event));
        }
    }

    pub struct Harness {
        pub service: SessionService,
        pub sink: Arc<RecordingSink>,
        pub clock: Arc<ManualClock>,
    }

    pub fn harness() -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = SessionService::new(
            Database::open_in_memory().unwrap(),
            IdentityHasher::new("test-secret"),
        )
        .with_events(sink.clone())
        .with_clock(clock.clone());

        Harness {
            service,
            sink,
            clock,
        }
    }

    pub fn params() -> CreateSessionParams {
        CreateSessionParams::new("Finish chapter three", "writing", 25, 30)
    }

    impl Harness {
        pub fn create(&self, creator: Uuid) -> Uuid {
            self.service.create_session(creator, params()).unwrap().session_id
        }

        pub fn create_private(&self, creator: Uuid) -> CreatedSession {
            self.service
                .create_session(creator, params().private())
                .unwrap()
        }

        /// Session driven into `focusing` with one extra participant
        pub fn focusing(&self, creator: Uuid, member: Uuid) -> Uuid {
            let id = self.create(creator);
            self.service.join_session(member, id).unwrap();
            self.service.skip_warmup(creator, id).unwrap();
            id
        }

        pub fn lock_count(&self) -> usize {
            self.service.locks.len()
        }
    }
}
