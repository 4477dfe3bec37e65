//! SQL schema for the application store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per application. Columns that are queried live on their own;
-- the rest of the aggregate is kept as JSON in `body`.
CREATE TABLE IF NOT EXISTS applications (
    application_id TEXT PRIMARY KEY,
    ident          TEXT NOT NULL,
    state          TEXT NOT NULL,   -- ApplicationState, snake_case
    created_at     TEXT NOT NULL,   -- ISO 8601 UTC
    body           TEXT NOT NULL    -- JSON, without activity log and answers
);

-- An owner has at most one application being created at a time.
CREATE UNIQUE INDEX IF NOT EXISTS applications_being_created_idx
    ON applications(ident) WHERE state = 'being_created';

CREATE INDEX IF NOT EXISTS applications_ident_idx ON applications(ident);

-- Activities are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS activities (
    application_id TEXT    NOT NULL REFERENCES applications(application_id),
    seq            INTEGER NOT NULL,
    severity       TEXT    NOT NULL,
    message        TEXT    NOT NULL,
    recorded_at    TEXT    NOT NULL,
    contexts       TEXT    NOT NULL,   -- JSON array of context frames
    need_kind      TEXT,               -- NULL unless severity = 'need'
    need_details   TEXT,               -- JSON object or NULL
    PRIMARY KEY (application_id, seq)
);

-- Read-side projection of the latest form answers.
CREATE TABLE IF NOT EXISTS form_answers (
    application_id TEXT    PRIMARY KEY REFERENCES applications(application_id),
    version        INTEGER NOT NULL,
    answers        TEXT    NOT NULL,
    updated_at     TEXT    NOT NULL
);

-- Outbox of need messages. Rows are written in the same transaction as the
-- application that raised them and deleted once published.
CREATE TABLE IF NOT EXISTS pending_messages (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id    TEXT NOT NULL UNIQUE,
    partition_key TEXT NOT NULL,
    body          TEXT NOT NULL    -- JSON NeedMessage
);

CREATE INDEX IF NOT EXISTS pending_messages_key_idx
    ON pending_messages(partition_key);

PRAGMA user_version = 2;
";
