//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Three tables:
//! - `commits` — canonical commit rows, deduplicated by sha; source of
//!   truth for all analytics, never deleted by normal operation.
//! - `cache_status` — fetch bookkeeping per (repository, start, end);
//!   safe to delete and recompute.
//! - `commit_word_frequencies` — precomputed word counts per range;
//!   safe to delete and recompute.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Canonical commit data
    -- ============================================

    CREATE TABLE IF NOT EXISTS commits (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        sha              TEXT NOT NULL UNIQUE,
        author_name      TEXT NOT NULL,
        author_email     TEXT,
        author_date      DATETIME NOT NULL,
        message_title    TEXT NOT NULL,
        message_body     TEXT,
        additions        INTEGER NOT NULL DEFAULT 0,
        deletions        INTEGER NOT NULL DEFAULT 0,
        total_changes    INTEGER NOT NULL DEFAULT 0,  -- always additions + deletions
        repository       TEXT NOT NULL,
        created_at       DATETIME NOT NULL,

        -- Statistical data (computed per range after fetch)
        z_score          REAL
    );

    CREATE INDEX IF NOT EXISTS idx_commits_repo_date ON commits(repository, author_date);
    CREATE INDEX IF NOT EXISTS idx_commits_author ON commits(author_name);

    -- ============================================
    -- Derived fetch/cache state (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS cache_status (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        repository       TEXT NOT NULL,
        start_date       DATETIME NOT NULL,
        end_date         DATETIME NOT NULL,
        last_cursor      TEXT,                        -- opaque pagination token
        completed        INTEGER NOT NULL DEFAULT 0,
        last_updated     DATETIME NOT NULL,

        UNIQUE(repository, start_date, end_date)
    );

    CREATE TABLE IF NOT EXISTS commit_word_frequencies (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        word             TEXT NOT NULL,
        frequency        INTEGER NOT NULL DEFAULT 0,
        repository       TEXT NOT NULL,
        start_date       DATETIME NOT NULL,
        end_date         DATETIME NOT NULL,

        UNIQUE(word, repository, start_date, end_date)
    );

    CREATE INDEX IF NOT EXISTS idx_word_freq_range
        ON commit_word_frequencies(repository, start_date, end_date, frequency DESC);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
