//! The single-writer database handle.
//!
//! One `Store` per process owns one SQLite connection behind a mutex.
//! Processes are single-threaded cooperative; cross-process writers are
//! serialized by SQLite's own locking with a 5 s busy timeout. Rapid hook
//! bursts are fine because each holds the write lock for one transaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::identifiers;
use crate::migrations;
use crate::row::{RowMap, RowValues, SqlValue};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = FULL;
PRAGMA foreign_keys = ON;";

/// Single-writer store over the project-local database file.
pub struct Store {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
    // Nested transaction() calls collapse into the outermost one.
    txn_depth: Arc<AtomicU32>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            conn: self.conn.clone(),
            txn_depth: self.txn_depth.clone(),
        }
    }
}

impl Store {
    /// Create a store for the database at `path`. No I/O happens until
    /// [`Store::connect`] or the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(Mutex::new(None)),
            txn_depth: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Open an in-memory store (for testing). Connects eagerly.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(PRAGMAS)?;
        let _ = migrations::run_migrations(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(Some(conn))),
            txn_depth: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Open the database file and apply pending migrations. Idempotent:
    /// calling on a connected store is a no-op.
    pub fn connect(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(open_connection(&self.path)?);
        Ok(())
    }

    /// Drop the connection. The next operation lazily reconnects.
    pub fn close(&self) {
        let mut guard = self.conn.lock();
        if guard.take().is_some() {
            debug!(path = %self.path.display(), "database connection closed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a closure against the live connection, reconnecting first
    /// when necessary.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(open_connection(&self.path)?);
        }
        f(guard.as_ref().expect("connection populated above"))
    }

    /// Insert a row. Returns the SQLite rowid.
    pub fn insert(&self, table: &str, values: &[(&str, SqlValue)]) -> Result<i64, StoreError> {
        let sql = build_insert("INSERT", table, values)?;
        self.with_conn(|conn| {
            let params: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|(_, v)| v as &dyn rusqlite::types::ToSql).collect();
            let _ = conn.execute(&sql, params.as_slice())?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert a row, replacing any existing row with the same primary key.
    pub fn insert_or_replace(&self, table: &str, values: &[(&str, SqlValue)]) -> Result<(), StoreError> {
        let sql = build_insert("INSERT OR REPLACE", table, values)?;
        self.with_conn(|conn| {
            let params: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|(_, v)| v as &dyn rusqlite::types::ToSql).collect();
            let _ = conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
    }

    /// Update rows. `where_clause` is trusted SQL with `?` placeholders;
    /// only the table and set-column identifiers are dynamic and both are
    /// validated. Returns the number of rows changed.
    pub fn update(
        &self,
        table: &str,
        set: &[(&str, SqlValue)],
        where_clause: &str,
        where_params: &[SqlValue],
    ) -> Result<usize, StoreError> {
        let _ = identifiers::check_table(table)?;
        for (column, _) in set {
            identifiers::check_column(table, column)?;
        }
        let assignments = set
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {table} SET {assignments} WHERE {where_clause}");

        self.with_conn(|conn| {
            let mut params: Vec<&dyn rusqlite::types::ToSql> =
                set.iter().map(|(_, v)| v as &dyn rusqlite::types::ToSql).collect();
            params.extend(
                where_params
                    .iter()
                    .map(|v| v as &dyn rusqlite::types::ToSql),
            );
            Ok(conn.execute(&sql, params.as_slice())?)
        })
    }

    /// Delete rows. Returns the number of rows changed.
    pub fn delete(
        &self,
        table: &str,
        where_clause: &str,
        where_params: &[SqlValue],
    ) -> Result<usize, StoreError> {
        let _ = identifiers::check_table(table)?;
        let sql = format!("DELETE FROM {table} WHERE {where_clause}");
        self.with_conn(|conn| {
            let params: Vec<&dyn rusqlite::types::ToSql> = where_params
                .iter()
                .map(|v| v as &dyn rusqlite::types::ToSql)
                .collect();
            Ok(conn.execute(&sql, params.as_slice())?)
        })
    }

    /// Execute a single trusted SQL statement with `?` placeholders.
    /// Returns the number of rows changed.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let param_refs: Vec<&dyn rusqlite::types::ToSql> = params
                .iter()
                .map(|v| v as &dyn rusqlite::types::ToSql)
                .collect();
            Ok(conn.execute(sql, param_refs.as_slice())?)
        })
    }

    /// Fetch a single row as a name→value map.
    pub fn fetch_one(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<RowMap>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let param_refs: Vec<&dyn rusqlite::types::ToSql> = params
                .iter()
                .map(|v| v as &dyn rusqlite::types::ToSql)
                .collect();
            let mut rows = stmt.query(param_refs.as_slice())?;
            match rows.next()? {
                Some(row) => Ok(Some(materialize(row, &names)?)),
                None => Ok(None),
            }
        })
    }

    /// Fetch all rows as name→value maps.
    pub fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RowMap>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let param_refs: Vec<&dyn rusqlite::types::ToSql> = params
                .iter()
                .map(|v| v as &dyn rusqlite::types::ToSql)
                .collect();
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(materialize(row, &names)?);
            }
            Ok(results)
        })
    }

    /// Run a closure inside a transaction. A failing closure rolls back
    /// and propagates. Nested calls collapse into the outer transaction.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError>,
    {
        let outer = self.txn_depth.fetch_add(1, Ordering::SeqCst) == 0;
        if outer {
            if let Err(e) = self.with_conn(|conn| {
                conn.execute_batch("BEGIN IMMEDIATE")?;
                Ok(())
            }) {
                let _ = self.txn_depth.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        }

        let result = f(self);
        let _ = self.txn_depth.fetch_sub(1, Ordering::SeqCst);

        if outer {
            match &result {
                Ok(_) => self.with_conn(|conn| {
                    conn.execute_batch("COMMIT")?;
                    Ok(())
                })?,
                Err(_) => {
                    let _ = self.with_conn(|conn| {
                        conn.execute_batch("ROLLBACK")?;
                        Ok(())
                    });
                }
            }
        }
        result
    }
}

fn build_insert(verb: &str, table: &str, values: &[(&str, SqlValue)]) -> Result<String, StoreError> {
    let _ = identifiers::check_table(table)?;
    for (column, _) in values {
        identifiers::check_column(table, column)?;
    }
    let columns = values
        .iter()
        .map(|(column, _)| *column)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = std::iter::repeat("?")
        .take(values.len())
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("{verb} INTO {table} ({columns}) VALUES ({placeholders})"))
}

fn materialize(row: &rusqlite::Row<'_>, names: &[String]) -> Result<RowMap, StoreError> {
    let mut map = RowMap::new();
    for (idx, name) in names.iter().enumerate() {
        let value: SqlValue = row.get(idx)?;
        map.insert(name.clone(), value);
    }
    Ok(map)
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        set_mode(parent, 0o700);
    }
    let conn = Connection::open(path)?;
    set_mode(path, 0o600);
    conn.execute_batch(PRAGMAS)?;
    let _ = migrations::run_migrations(&conn)?;
    info!(path = %path.display(), "database opened");
    Ok(conn)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
