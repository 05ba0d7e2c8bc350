//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::{params, Connection};
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial session schema",
        sql: r#"
            -- One row per focus room
            CREATE TABLE IF NOT EXISTS focus_sessions (
                id TEXT PRIMARY KEY,
                intent TEXT NOT NULL,
                topic TEXT NOT NULL,
                min_duration INTEGER NOT NULL,
                max_duration INTEGER NOT NULL,
                actual_duration INTEGER NOT NULL,
                repetitions INTEGER NOT NULL,
                break_duration INTEGER NOT NULL,
                break_interval INTEGER NOT NULL,
                current_repetition INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                creator_id TEXT NOT NULL,
                participant_count INTEGER NOT NULL DEFAULT 0,
                matching_tags TEXT NOT NULL DEFAULT '[]',
                is_private INTEGER NOT NULL DEFAULT 0,
                invite_code TEXT NOT NULL UNIQUE,
                accepted_identity_hashes TEXT NOT NULL DEFAULT '[]',
                chat_enabled INTEGER NOT NULL DEFAULT 1,
                creator_display_name TEXT NOT NULL
            );

            -- Pseudonymous participation, one row per (session, identity)
            CREATE TABLE IF NOT EXISTS session_participants (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                identity_hash TEXT NOT NULL,
                display_alias TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                left_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_reaction TEXT,
                outcome TEXT,
                ledger_applied INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (session_id) REFERENCES focus_sessions(id) ON DELETE CASCADE,
                UNIQUE(session_id, identity_hash)
            );

            -- Session chat
            CREATE TABLE IF NOT EXISTS session_messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                sender_alias TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES focus_sessions(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Add focus ledger, daily activity and identity index",
        sql: r#"
            -- Per-user aggregate, never references a session
            CREATE TABLE IF NOT EXISTS focus_ledgers (
                user_id TEXT PRIMARY KEY,
                total_focus_minutes INTEGER NOT NULL DEFAULT 0,
                total_sessions INTEGER NOT NULL DEFAULT 0,
                completed_sessions INTEGER NOT NULL DEFAULT 0,
                weekly_stats TEXT NOT NULL DEFAULT '[]',
                focus_patterns TEXT NOT NULL DEFAULT '{}',
                retention_weeks INTEGER NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_focus_activity (
                user_id TEXT NOT NULL,
                day TEXT NOT NULL,
                session_count INTEGER NOT NULL DEFAULT 0,
                total_minutes INTEGER NOT NULL DEFAULT 0,
                completed_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, day)
            );

            -- Reverse lookup from identity hash to user, used only by the ledger
            CREATE TABLE IF NOT EXISTS ledger_identities (
                identity_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        description: "Add user profiles for leaderboard nicknames",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                nickname TEXT NOT NULL UNIQUE COLLATE NOCASE,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 4,
        description: "Add indexes for query performance",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON focus_sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_creator ON focus_sessions(creator_id);
            CREATE INDEX IF NOT EXISTS idx_participants_hash ON session_participants(identity_hash);
            CREATE INDEX IF NOT EXISTS idx_messages_session_seq ON session_messages(session_id, sequence);
            CREATE INDEX IF NOT EXISTS idx_ledger_identities_user ON ledger_identities(user_id);
            CREATE INDEX IF NOT EXISTS idx_daily_activity_day ON daily_focus_activity(day);
        "#,
    },
];

/// Initialize the migrations tracking table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;
    Ok(())
}

/// Get the current schema version
pub fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn.query_row(
        "SELECT MAX(version) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

/// Record that a migration was applied
fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Run all pending migrations
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let current_version = get_current_version(conn)?;
    info!(current_version, "Checking for pending migrations");

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );

            conn.execute_batch(migration.sql)?;
            record_migration(conn, migration)?;

            info!(version = migration.version, "Migration complete");
        }
    }

    let new_version = get_current_version(conn)?;
    if new_version > current_version {
        info!(
            from = current_version,
            to = new_version,
            "Database schema updated"
        );
    }

    Ok(())
}
