//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Device records: serialized profile, raw identity
-- ============================================================

CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- ============================================================
-- Encounter history
-- ============================================================

CREATE TABLE IF NOT EXISTS encounters (
    peer_id TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    last_active INTEGER,
    first_met INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    meet_count INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_encounters_last_seen ON encounters(last_seen);
"#;
