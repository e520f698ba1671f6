//! DDL for both backends
//!
//! Ids are stored as hyphenated UUID text on both sides, so rows written by
//! either backend read back identically.

/// Appended after the VALUES list of a multi-row kill insert
pub const UPSERT_KILLS_SUFFIX: &str = " ON CONFLICT (actor_id, target_id) DO UPDATE SET \
     count = kill_records.count + excluded.count, \
     updated_at = CURRENT_TIMESTAMP";

/// Appended after the VALUES list of a multi-row placeholder actor insert
pub const INSERT_ACTORS_SUFFIX: &str = " ON CONFLICT (id) DO NOTHING";

pub const POSTGRES_CREATE_ACTORS: &str = r#"
CREATE TABLE IF NOT EXISTS actors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const POSTGRES_CREATE_KILL_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS kill_records (
    actor_id TEXT NOT NULL REFERENCES actors (id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES actors (id) ON DELETE CASCADE,
    count BIGINT NOT NULL DEFAULT 1 CHECK (count >= 0),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (actor_id, target_id)
)
"#;

pub const SQLITE_CREATE_ACTORS: &str = r#"
CREATE TABLE IF NOT EXISTS actors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const SQLITE_CREATE_KILL_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS kill_records (
    actor_id TEXT NOT NULL REFERENCES actors (id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES actors (id) ON DELETE CASCADE,
    count INTEGER NOT NULL DEFAULT 1 CHECK (count >= 0),
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (actor_id, target_id)
)
"#;

/// Same text on both backends
pub const CREATE_TARGET_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_kill_records_target ON kill_records (target_id)";

/// Statements in dependency order; each is idempotent
pub fn postgres_statements() -> [&'static str; 3] {
    [
        POSTGRES_CREATE_ACTORS,
        POSTGRES_CREATE_KILL_RECORDS,
        CREATE_TARGET_INDEX,
    ]
}

pub fn sqlite_statements() -> [&'static str; 3] {
    [
        SQLITE_CREATE_ACTORS,
        SQLITE_CREATE_KILL_RECORDS,
        CREATE_TARGET_INDEX,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actors_created_before_kill_records() {
        for statements in [postgres_statements(), sqlite_statements()] {
            assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS actors"));
            assert!(statements[1].contains("CREATE TABLE IF NOT EXISTS kill_records"));
            assert!(statements.iter().all(|s| s.contains("IF NOT EXISTS")));
        }
    }

    #[test]
    fn test_upsert_adds_to_existing_count() {
        assert!(UPSERT_KILLS_SUFFIX.contains("kill_records.count + excluded.count"));
    }
}
