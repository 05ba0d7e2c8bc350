//! SQLite storage layer for Focusroom
//!
//! Every store borrows a `Connection`, so the same store code runs against
//! the plain connection or inside a transaction.

mod ledgers;
mod messages;
mod migrations;
mod parse;
mod participants;
mod profiles;
mod sessions;

use std::path::Path;

use rusqlite::Connection;
use tracing::instrument;

use crate::error::Result;

pub use ledgers::{ActivityTotals, LedgerStore};
pub use messages::MessageStore;
pub use participants::ParticipantStore;
pub use profiles::ProfileStore;
pub use sessions::SessionStore;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<u32> {
        migrations::get_current_version(&self.conn)
    }

    /// Run `f` in a transaction; commits on `Ok`, rolls back on `Err`
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn sessions(&self) -> SessionStore<'_> {
        SessionStore::new(&self.conn)
    }

    pub fn participants(&self) -> ParticipantStore<'_> {
        ParticipantStore::new(&self.conn)
    }

    pub fn messages(&self) -> MessageStore<'_> {
        MessageStore::new(&self.conn)
    }

    pub fn ledgers(&self) -> LedgerStore<'_> {
        LedgerStore::new(&self.conn)
    }

    pub fn profiles(&self) -> ProfileStore<'_> {
        ProfileStore::new(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{ChatMessage, Outcome, SessionParticipant, SessionStatus};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn insert_session(db: &Database) -> Uuid {
        let session = crate::models::FocusSession {
            id: Uuid::new_v4(),
            intent: "Draft the report".into(),
            topic: "work".into(),
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
            participant_count: 0,
            matching_tags: vec!["work".into()],
            is_private: true,
            invite_code: crate::access::generate_invite_code(),
            accepted_identity_hashes: vec!["h1".into()],
            chat_enabled: true,
            creator_display_name: "Bold Lynx 9".into(),
        };
        db.sessions().create(&session).unwrap();
        session.id
    }

    #[test]
    fn test_session_roundtrip_and_update() {
        let db = Database::open_in_memory().unwrap();
        let id = insert_session(&db);

        let mut session = db.sessions().find_by_id(id).unwrap().unwrap();
        assert_eq!(session.accepted_identity_hashes, vec!["h1".to_string()]);
        assert!(session.is_private);

        session.status = SessionStatus::Focusing;
        session.started_at = Some(Utc::now());
        db.sessions().update(&session).unwrap();

        let reloaded = db.sessions().find_by_invite_code(&session.invite_code).unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Focusing);
        assert!(reloaded.started_at.is_some());
    }

    #[test]
    fn test_participant_count_tracks_active_rows() {
        let db = Database::open_in_memory().unwrap();
        let id = insert_session(&db);

        let a = SessionParticipant::new(id, "a".into(), "Calm Otter 1".into(), Utc::now());
        let mut b = SessionParticipant::new(id, "b".into(), "Bold Fox 2".into(), Utc::now());
        db.participants().insert(&a).unwrap();
        db.participants().insert(&b).unwrap();
        assert_eq!(db.sessions().refresh_participant_count(id).unwrap(), 2);

        b.is_active = false;
        b.outcome = Some(Outcome::Interrupted);
        db.participants().update(&b).unwrap();
        assert_eq!(db.sessions().refresh_participant_count(id).unwrap(), 1);

        let stored = db.participants().find(id, "b").unwrap().unwrap();
        assert_eq!(stored.outcome, Some(Outcome::Interrupted));
        assert!(!db.participants().is_active(id, "b").unwrap());
    }

    #[test]
    fn test_duplicate_participant_rejected() {
        let db = Database::open_in_memory().unwrap();
        let id = insert_session(&db);

        let first = SessionParticipant::new(id, "same".into(), "Calm Otter 1".into(), Utc::now());
        let second = SessionParticipant::new(id, "same".into(), "Bold Fox 2".into(), Utc::now());
        db.participants().insert(&first).unwrap();
        assert!(matches!(
            db.participants().insert(&second),
            Err(Error::Database(_))
        ));
    }

    #[test]
    fn test_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let id = insert_session(&db);

        let result: Result<()> = db.transaction(|conn| {
            let p = SessionParticipant::new(id, "x".into(), "Keen Owl 4".into(), Utc::now());
            ParticipantStore::new(conn).insert(&p)?;
            Err(Error::Conflict("abort".into()))
        });
        assert!(result.is_err());
        assert!(db.participants().find(id, "x").unwrap().is_none());
    }

    #[test]
    fn test_messages_keep_latest_in_order() {
        let db = Database::open_in_memory().unwrap();
        let id = insert_session(&db);

        for i in 0..5 {
            let msg = ChatMessage::new(id, "Calm Otter 1".into(), format!("m{}", i), Utc::now());
            db.messages().create(&msg).unwrap();
        }

        let recent = db.messages().list_recent(id, 3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_daily_activity_accumulates() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

        db.ledgers().record_daily(user, day, 25, true).unwrap();
        db.ledgers().record_daily(user, day, 12, false).unwrap();

        let days = db.ledgers().daily_between(user, day, day).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].session_count, 2);
        assert_eq!(days[0].total_minutes, 37);
        assert_eq!(days[0].completed_count, 1);

        let totals = db.ledgers().totals_since(day).unwrap();
        assert_eq!(totals[0].total_minutes, 37);
    }

    #[test]
    fn test_identity_index_and_purge() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();

        db.ledgers().register_identity("hash-1", user).unwrap();
        db.ledgers().register_identity("hash-1", user).unwrap();
        assert_eq!(db.ledgers().resolve_identity("hash-1").unwrap(), Some(user));
        assert_eq!(db.ledgers().identities_for(user).unwrap().len(), 1);

        db.ledgers()
            .save(&crate::models::FocusLedger::new(user, Utc::now()))
            .unwrap();
        assert_eq!(db.ledgers().purge(user).unwrap(), 2);
        assert!(db.ledgers().find(user).unwrap().is_none());
        assert_eq!(db.ledgers().resolve_identity("hash-1").unwrap(), None);
    }

    #[test]
    fn test_nickname_uniqueness_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        db.profiles().set_nickname(alice, "Focus", Utc::now()).unwrap();

        assert_eq!(db.profiles().find_owner("focus").unwrap(), Some(alice));
        assert!(db
            .profiles()
            .set_nickname(Uuid::new_v4(), "FOCUS", Utc::now())
            .is_err());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focusroom.db");
        {
            let db = Database::open(&path).unwrap();
            insert_session(&db);
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), 4);
        assert_eq!(db.sessions().list_open_ids().unwrap().len(), 1);
    }
}
