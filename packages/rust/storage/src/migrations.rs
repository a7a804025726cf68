//! SQL migration definitions for the PageWatch database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: targets, observations",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Monitored targets
CREATE TABLE IF NOT EXISTS targets (
    id                 TEXT PRIMARY KEY,
    url                TEXT NOT NULL,
    selector           TEXT NOT NULL,
    schedule_json      TEXT NOT NULL,
    active             INTEGER NOT NULL DEFAULT 1,
    custom_instruction TEXT,
    created_at         TEXT NOT NULL
);

-- Observation history, one row per detected content state or failed run
CREATE TABLE IF NOT EXISTS observations (
    id           TEXT PRIMARY KEY,
    target_id    TEXT NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
    content      TEXT NOT NULL,
    content_hash TEXT,
    summary      TEXT,
    created_at   TEXT NOT NULL,
    is_current   INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_observations_target_time
    ON observations(target_id, created_at);

-- At most one current observation per target
CREATE UNIQUE INDEX IF NOT EXISTS idx_observations_one_current
    ON observations(target_id) WHERE is_current = 1;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Track target activation time",
            sql: r#"
ALTER TABLE targets ADD COLUMN activated_at TEXT;
UPDATE targets SET activated_at = created_at WHERE activated_at IS NULL;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
