//! Database migrations for the local store (C3).
//!
//! Follows the teacher's versioned-migration pattern: a static list of
//! `(version, description, SQL)` entries applied in order via
//! `execute_batch`, tracked in a `schema_version` table.

/// A database migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number.
    pub version: u32,
    /// Human-readable description, surfaced in `tracing::info!` at apply time.
    pub description: &'static str,
    /// SQL to apply.
    pub up: &'static str,
}

/// Migration definitions, applied in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "memories, FTS5 keyword index, associations, archive",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "sync cursor and config_meta",
        up: MIGRATION_V2_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    content_hash TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    memory_type TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at REAL NOT NULL,
    updated_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at);
CREATE INDEX IF NOT EXISTS idx_memories_memory_type ON memories(memory_type);

-- Embeddings stored separately so a memory can legally have none.
CREATE TABLE IF NOT EXISTS memory_embeddings (
    content_hash TEXT PRIMARY KEY REFERENCES memories(content_hash) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL
);

-- FTS5 virtual table backing exact_match_search and the keyword half of
-- hybrid search.
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content_hash UNINDEXED,
    content,
    tags,
    tokenize='porter ascii'
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content_hash, content, tags)
    VALUES (NEW.rowid, NEW.content_hash, NEW.content, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content_hash, content, tags)
    VALUES ('delete', OLD.rowid, OLD.content_hash, OLD.content, OLD.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content_hash, content, tags)
    VALUES ('delete', OLD.rowid, OLD.content_hash, OLD.content, OLD.tags);
    INSERT INTO memories_fts(rowid, content_hash, content, tags)
    VALUES (NEW.rowid, NEW.content_hash, NEW.content, NEW.tags);
END;

CREATE TABLE IF NOT EXISTS associations (
    hash_a TEXT NOT NULL,
    hash_b TEXT NOT NULL,
    strength REAL NOT NULL,
    reason TEXT NOT NULL,
    created_at REAL NOT NULL,
    last_reinforced_at REAL NOT NULL,
    PRIMARY KEY (hash_a, hash_b),
    CHECK (hash_a < hash_b)
);

CREATE INDEX IF NOT EXISTS idx_associations_hash_a ON associations(hash_a);
CREATE INDEX IF NOT EXISTS idx_associations_hash_b ON associations(hash_b);

-- Memories moved here by consolidation's retention phase. Excluded from
-- retrieval but recoverable within the archive retention window.
CREATE TABLE IF NOT EXISTS archive (
    content_hash TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    memory_type TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at REAL NOT NULL,
    updated_at REAL NOT NULL,
    archived_at REAL NOT NULL,
    archive_reason TEXT NOT NULL DEFAULT 'retention'
);

CREATE INDEX IF NOT EXISTS idx_archive_archived_at ON archive(archived_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

const MIGRATION_V2_UP: &str = r#"
-- Sync engine's per-process reconciliation cursor: a single row keyed by a
-- constant id, storing the last-seen (epoch, seq) watermark.
CREATE TABLE IF NOT EXISTS sync_cursor (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    epoch REAL NOT NULL DEFAULT 0,
    seq INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO sync_cursor (id, epoch, seq) VALUES (0, 0, 0);

-- Store-wide stamped configuration, written once at first init and then
-- read-only (embedding dimension, backend id).
CREATE TABLE IF NOT EXISTS config_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Read the highest applied migration version (`0` for a fresh database).
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply every migration newer than the database's current version, in
/// order. Returns the number of migrations applied.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_fresh_database_applies_all_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len() as u32);
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn test_reapplying_migrations_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let applied_again = apply_migrations(&conn).unwrap();
        assert_eq!(applied_again, 0);
    }
}
