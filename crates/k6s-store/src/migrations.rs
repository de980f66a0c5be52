//! Versioned schema migrations.
//!
//! Migrations are an ordered list of `(version, sql)` pairs executed in
//! version order, each inside its own transaction with a row recorded in
//! `schema_migrations`. Versions are monotone and never re-ordered; the
//! runner is idempotent. Any column added in a later migration must also be
//! added to the identifier allow-list.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Core governance schema",
    sql: V1_SCHEMA,
}];

const V1_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    objective TEXT NOT NULL,
    state TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    parent_session_id TEXT,
    config_snapshot TEXT,
    context_summary TEXT,
    metadata TEXT,
    operator TEXT,
    hostname TEXT,
    k6s_version TEXT,
    agent_runtime_version TEXT,
    git_branch TEXT,
    git_sha TEXT,
    git_dirty INTEGER NOT NULL DEFAULT 0,
    trace_id TEXT
);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    specialization TEXT,
    state TEXT NOT NULL,
    spawned_at TEXT NOT NULL,
    boundary_config TEXT,
    metadata TEXT,
    external_session_id TEXT,
    tool_call_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_agents_session ON agents(session_id);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    sequence INTEGER NOT NULL,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    agent_id TEXT REFERENCES agents(id),
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT,
    files_affected TEXT,
    gate_id TEXT,
    hmac TEXT,
    severity TEXT NOT NULL DEFAULT 'info'
);
CREATE INDEX IF NOT EXISTS idx_audit_events_session_seq ON audit_events(session_id, sequence);
CREATE INDEX IF NOT EXISTS idx_audit_events_type ON audit_events(event_type);
CREATE INDEX IF NOT EXISTS idx_audit_events_agent ON audit_events(agent_id);

CREATE TABLE IF NOT EXISTS context_store (
    key TEXT NOT NULL,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    agent_id TEXT,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (key, session_id)
);

CREATE TABLE IF NOT EXISTS file_locks (
    path TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT
);

CREATE TABLE IF NOT EXISTS boundary_violations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    agent_id TEXT,
    timestamp TEXT NOT NULL,
    file_path TEXT NOT NULL,
    violation_type TEXT NOT NULL,
    enforcement_action TEXT NOT NULL,
    details TEXT
);
CREATE INDEX IF NOT EXISTS idx_boundary_violations_session ON boundary_violations(session_id);
"#;

/// Run all pending migrations. Returns how many were applied.
pub fn run_migrations(conn: &Connection) -> Result<u32, StoreError> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(
                version = migration.version,
                description = migration.description,
                "migration already applied, skipping"
            );
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "migrations complete");
    }
    Ok(applied)
}

/// Highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn ensure_version_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version INTEGER PRIMARY KEY,
           applied_at TEXT NOT NULL DEFAULT (datetime('now'))
         );",
    )?;
    Ok(())
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    let _ = tx.execute(
        "INSERT INTO schema_migrations (version) VALUES (?1)",
        [migration.version],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers;

    fn open_memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn run_migrations_creates_all_tables() {
        let conn = open_memory();
        let applied = run_migrations(&conn).unwrap();
        assert_eq!(applied, 1);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "sessions",
            "agents",
            "audit_events",
            "context_store",
            "file_locks",
            "boundary_violations",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table: {table}");
        }
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let conn = open_memory();
        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn current_version_tracks_applied() {
        let conn = open_memory();
        ensure_version_table(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn indexes_are_created() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for idx in [
            "idx_audit_events_session_seq",
            "idx_audit_events_type",
            "idx_audit_events_agent",
            "idx_agents_session",
            "idx_boundary_violations_session",
        ] {
            assert!(indexes.contains(&idx.to_string()), "missing index: {idx}");
        }
    }

    #[test]
    fn schema_matches_identifier_allow_list() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        for table in [
            "sessions",
            "agents",
            "audit_events",
            "context_store",
            "file_locks",
            "boundary_violations",
        ] {
            let allowed = identifiers::check_table(table).unwrap();
            let actual: Vec<String> = conn
                .prepare(&format!("PRAGMA table_info({table})"))
                .unwrap()
                .query_map([], |row| row.get::<_, String>(1))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();

            for col in &actual {
                assert!(
                    allowed.contains(&col.as_str()),
                    "{table}.{col} missing from allow-list"
                );
            }
            for col in allowed {
                assert!(
                    actual.contains(&col.to_string()),
                    "{table}.{col} in allow-list but not in schema"
                );
            }
        }
    }

    #[test]
    fn foreign_keys_enforced() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO agents (id, session_id, name, role, state, spawned_at)
             VALUES ('a1', 'missing-session', 'primary', 'teammate', 'active', '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn context_store_upserts_on_composite_key() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (id, objective, state, started_at)
             VALUES ('s1', 'obj', 'created', '2026-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

        for value in ["\"first\"", "\"second\""] {
            conn.execute(
                "INSERT OR REPLACE INTO context_store (key, session_id, value, updated_at)
                 VALUES ('plan', 's1', ?1, '2026-01-01T00:00:00.000Z')",
                [value],
            )
            .unwrap();
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM context_store", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
