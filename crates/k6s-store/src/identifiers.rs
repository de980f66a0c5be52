//! Compiled-in identifier allow-list.
//!
//! Every method that substitutes a table or column name into SQL routes
//! through [`check_table`] / [`check_column`] before the query string is
//! built. Unknown identifiers fail with a typed error; nothing
//! caller-supplied ever reaches the SQL text unvalidated.

use crate::error::StoreError;

/// Known tables and their columns, kept in lockstep with the migrations.
const TABLES: &[(&str, &[&str])] = &[
    (
        "sessions",
        &[
            "id",
            "objective",
            "state",
            "started_at",
            "ended_at",
            "parent_session_id",
            "config_snapshot",
            "context_summary",
            "metadata",
            "operator",
            "hostname",
            "k6s_version",
            "agent_runtime_version",
            "git_branch",
            "git_sha",
            "git_dirty",
            "trace_id",
        ],
    ),
    (
        "agents",
        &[
            "id",
            "session_id",
            "name",
            "role",
            "specialization",
            "state",
            "spawned_at",
            "boundary_config",
            "metadata",
            "external_session_id",
            "tool_call_count",
        ],
    ),
    (
        "audit_events",
        &[
            "id",
            "sequence",
            "session_id",
            "agent_id",
            "timestamp",
            "event_type",
            "action",
            "details",
            "files_affected",
            "gate_id",
            "hmac",
            "severity",
        ],
    ),
    (
        "context_store",
        &["key", "session_id", "agent_id", "value", "updated_at"],
    ),
    (
        "file_locks",
        &["path", "session_id", "agent_id", "acquired_at", "expires_at"],
    ),
    (
        "boundary_violations",
        &[
            "id",
            "session_id",
            "agent_id",
            "timestamp",
            "file_path",
            "violation_type",
            "enforcement_action",
            "details",
        ],
    ),
    ("schema_migrations", &["version", "applied_at"]),
];

/// Shape check applied before the allow-list lookup.
fn is_safe_shape(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Validate a table name. Returns its column list for follow-up checks.
pub fn check_table(table: &str) -> Result<&'static [&'static str], StoreError> {
    if !is_safe_shape(table) {
        return Err(StoreError::UnsafeIdentifier(table.to_owned()));
    }
    TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, columns)| *columns)
        .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))
}

/// Validate a column name for a known table.
pub fn check_column(table: &str, column: &str) -> Result<(), StoreError> {
    let columns = check_table(table)?;
    if !is_safe_shape(column) {
        return Err(StoreError::UnsafeIdentifier(column.to_owned()));
    }
    if columns.contains(&column) {
        Ok(())
    } else {
        Err(StoreError::UnknownColumn {
            table: table.to_owned(),
            column: column.to_owned(),
        })
    }
}
