//! SQL migration definitions for the listingscout database.
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
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, listings",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per harvest run
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    listing_url TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Extracted listings; structured fields are JSON text
CREATE TABLE IF NOT EXISTS listings (
    id               TEXT PRIMARY KEY,
    url              TEXT NOT NULL UNIQUE,
    title            TEXT NOT NULL,
    price            TEXT NOT NULL,
    location         TEXT NOT NULL,
    publication_time TEXT NOT NULL,
    seller           TEXT NOT NULL,
    category         TEXT NOT NULL,
    description      TEXT NOT NULL,
    breadcrumb       TEXT NOT NULL,
    properties       TEXT NOT NULL,
    equipments       TEXT NOT NULL,
    images           TEXT NOT NULL,
    run_id           TEXT REFERENCES runs(id) ON DELETE SET NULL,
    scraped_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_listings_run_id ON listings(run_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
