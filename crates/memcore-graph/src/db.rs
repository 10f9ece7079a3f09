//! Schema initialisation and forward-only migrations.
//!
//! Every migration is attempted once per startup and records itself in
//! `schema_migrations` only on success (spec §4.1 / §7). A migration that
//! fails because its effect already exists (e.g. a concurrent startup won
//! the race) is swallowed — it simply isn't recorded, and is retried next
//! startup. Migrations MUST be idempotent: re-running an already-applied
//! migration's SQL must not error in a way that isn't tolerated here.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::Result;

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "create nodes, edges, embeddings tables",
        apply: migration_001_base_schema,
    }]
}

fn migration_001_base_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nodes (
            id              TEXT PRIMARY KEY,
            node_type       TEXT NOT NULL,
            subtype         TEXT,
            content         TEXT NOT NULL,
            salience        REAL NOT NULL DEFAULT 1.0,
            confidence      REAL NOT NULL DEFAULT 1.0,
            source          TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            valid_from      TEXT,
            valid_until     TEXT,
            superseded_by   TEXT,
            attributes      TEXT NOT NULL DEFAULT '{}',
            can_summarize   INTEGER NOT NULL DEFAULT 1,
            scope           REAL
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
        CREATE INDEX IF NOT EXISTS idx_nodes_superseded ON nodes(superseded_by);
        CREATE INDEX IF NOT EXISTS idx_nodes_created ON nodes(created_at);

        CREATE TABLE IF NOT EXISTS edges (
            id          TEXT PRIMARY KEY,
            source_id   TEXT NOT NULL,
            target_id   TEXT NOT NULL,
            edge_type   TEXT NOT NULL,
            attributes  TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

        CREATE TABLE IF NOT EXISTS embeddings (
            node_id     TEXT PRIMARY KEY,
            node_type   TEXT NOT NULL,
            vector      BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_embeddings_type ON embeddings(node_type);",
    )
}

/// Run every not-yet-applied migration against `conn`. Safe to call on
/// every startup.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TEXT NOT NULL
        );",
    )?;

    for m in migrations() {
        let already_applied: Option<i64> = conn
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                rusqlite::params![m.version],
                |row| row.get(0),
            )
            .ok();

        if already_applied.is_some() {
            continue;
        }

        if let Err(e) = (m.apply)(conn) {
            warn!(
                version = m.version,
                description = m.description,
                err = %e,
                "migration failed — not recorded, will retry next startup"
            );
            continue;
        }

        // OR IGNORE: two concurrent first-startups can both pass the
        // `already_applied` check above and both apply and try to record
        // version `m.version` — the loser must not error out of
        // `run_migrations` with a primary-key violation (spec §4.1:
        // tolerate repeated application under concurrent startup).
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![m.version, m.description, chrono::Utc::now().to_rfc3339()],
        )?;
        debug!(version = m.version, description = m.description, "migration applied");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_migrations_twice_applies_each_version_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations WHERE version = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn recording_an_already_applied_version_is_tolerated() {
        // Simulates the loser of a concurrent-startup race: the migration's
        // effect already landed and another writer already recorded the
        // version, so the `INSERT OR IGNORE` must not error.
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, description, applied_at) VALUES (1, 'create nodes, edges, embeddings tables', ?1)",
            rusqlite::params![chrono::Utc::now().to_rfc3339()],
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations WHERE version = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
