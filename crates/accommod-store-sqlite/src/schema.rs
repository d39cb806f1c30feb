//! SQL schema for the accommodation SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Source-of-truth facts ───────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS subjects (
    uid           TEXT PRIMARY KEY,
    display_name  TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    admin         INTEGER NOT NULL DEFAULT 0,
    manager       INTEGER NOT NULL DEFAULT 0,
    renfort       INTEGER NOT NULL DEFAULT 0,
    services      TEXT NOT NULL DEFAULT '[]'   -- JSON array of service UUIDs
);

CREATE TABLE IF NOT EXISTS services (
    service_id  TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS assignments (
    assignment_id  TEXT PRIMARY KEY,
    uid            TEXT NOT NULL,
    kind           TEXT NOT NULL,   -- 'committee' | 'beneficiary' | 'intervention'
    label          TEXT NOT NULL,
    start_date     TEXT NOT NULL,
    end_date       TEXT              -- exclusive; NULL = open-ended
);

CREATE TABLE IF NOT EXISTS requests (
    request_id          TEXT PRIMARY KEY,
    uid                 TEXT NOT NULL,
    state               TEXT NOT NULL,
    required_questions  TEXT NOT NULL DEFAULT '[]',
    modified_at         TEXT NOT NULL,
    version             INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS answers (
    request_id    TEXT NOT NULL,
    question_id   TEXT NOT NULL,
    value_json    TEXT NOT NULL,
    submitted_at  TEXT NOT NULL,
    PRIMARY KEY (request_id, question_id)
);

CREATE TABLE IF NOT EXISTS opinions (
    opinion_id   TEXT PRIMARY KEY,
    uid          TEXT NOT NULL,
    start_date   TEXT NOT NULL,
    end_date     TEXT,
    modified_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accommodations (
    accommodation_id  TEXT PRIMARY KEY,
    uid               TEXT NOT NULL,
    domain            TEXT NOT NULL,   -- 'exam' | 'pedagogical' | 'support'
    label             TEXT NOT NULL,
    start_date        TEXT NOT NULL,
    end_date          TEXT,
    modified_at       TEXT NOT NULL
);

-- ── Derived rows (version-checked writes only) ──────────────────────────────

CREATE TABLE IF NOT EXISTS role_sets (
    uid          TEXT PRIMARY KEY,
    roles        TEXT NOT NULL,     -- JSON array of ROLE_* tags
    computed_at  TEXT NOT NULL,
    version      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS opinion_states (
    uid            TEXT PRIMARY KEY,
    status         TEXT NOT NULL,
    opinion_id     TEXT,
    opinion_start  TEXT,
    opinion_end    TEXT,
    computed_at    TEXT NOT NULL,
    version        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS decisions (
    decision_id   TEXT PRIMARY KEY,
    uid           TEXT NOT NULL,
    start_year    INTEGER NOT NULL,
    status        TEXT NOT NULL,
    facts_digest  TEXT NOT NULL,
    modified_at   TEXT NOT NULL,
    version       INTEGER NOT NULL,
    UNIQUE (uid, start_year)
);

-- ── Bus journal ─────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS event_journal (
    event_id      TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    envelope      TEXT NOT NULL,    -- JSON-encoded Envelope
    published_at  TEXT NOT NULL,
    completed_at  TEXT
);

CREATE TABLE IF NOT EXISTS dead_letters (
    dead_letter_id  TEXT PRIMARY KEY,
    event_id        TEXT NOT NULL,
    handler         TEXT NOT NULL,
    error           TEXT NOT NULL,
    attempts        INTEGER NOT NULL,
    failed_at       TEXT NOT NULL,
    envelope        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS migrations (
    name          TEXT PRIMARY KEY,
    version       INTEGER NOT NULL,
    completed_at  TEXT NOT NULL,
    items         INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS assignments_uid_idx     ON assignments(uid);
CREATE INDEX IF NOT EXISTS requests_uid_idx        ON requests(uid);
CREATE INDEX IF NOT EXISTS opinions_uid_idx        ON opinions(uid);
CREATE INDEX IF NOT EXISTS accommodations_uid_idx  ON accommodations(uid);
CREATE INDEX IF NOT EXISTS journal_pending_idx     ON event_journal(completed_at);

PRAGMA user_version = 1;
";
