//! SQL schema for the Cadence SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Credential columns hold vault ciphertext, never plaintext.
CREATE TABLE IF NOT EXISTS subjects (
    subject_id           TEXT PRIMARY KEY,
    sink_user_id         TEXT NOT NULL UNIQUE,
    sink_team_id         TEXT,
    source_user_id       TEXT,
    sink_token           TEXT NOT NULL,
    sink_bot_token       TEXT,
    source_access_token  TEXT,
    source_refresh_token TEXT,
    source_expires_at    TEXT,            -- RFC 3339 UTC
    track_id             TEXT,
    track_title          TEXT,
    track_performer      TEXT,
    last_synced_at       TEXT,
    last_status_text     TEXT,
    sync_state           TEXT NOT NULL DEFAULT 'active',  -- 'active' | 'manual_override' | 'invalidated'
    invalidated_at       TEXT,
    status_cleared       INTEGER NOT NULL DEFAULT 0,
    active               INTEGER NOT NULL DEFAULT 1,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    CHECK (NOT (sync_state = 'manual_override' AND status_cleared = 1))
);

CREATE TABLE IF NOT EXISTS sync_policies (
    subject_id            TEXT PRIMARY KEY REFERENCES subjects(subject_id) ON DELETE CASCADE,
    enabled               INTEGER NOT NULL DEFAULT 1,
    active                INTEGER NOT NULL DEFAULT 0,
    default_emoji         TEXT NOT NULL,
    rotating_emojis       TEXT NOT NULL DEFAULT '[]',  -- JSON array
    content_filter        TEXT NOT NULL DEFAULT 'both',
    allowed_devices       TEXT,                        -- JSON array or NULL
    hours_enabled         INTEGER NOT NULL DEFAULT 0,
    hours_start_minute    INTEGER,                     -- UTC minute of day
    hours_end_minute      INTEGER,
    tz_offset_seconds     INTEGER,
    show_performer        INTEGER NOT NULL DEFAULT 1,
    show_title            INTEGER NOT NULL DEFAULT 1,
    template              TEXT NOT NULL,
    notifications_enabled INTEGER NOT NULL DEFAULT 0,
    updated_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS subjects_active_idx ON subjects(active);

PRAGMA user_version = 1;
";
