//! Transactional, TTL-bounded exclusive file locks.
//!
//! The lock key is the path: at most one live lock per path across the
//! whole project. Every mutating method runs inside one transaction; the
//! single-writer store makes that an atomic compare-and-swap without any
//! application-level locking.

use tracing::instrument;

use k6s_core::ids::{AgentId, SessionId};
use k6s_core::time;
use k6s_store::models::FileLock;
use k6s_store::{SqlValue, Store, StoreError};

use crate::errors::EngineError;

/// Default TTL when the caller does not specify one.
pub const DEFAULT_LOCK_DURATION_SECONDS: i64 = 300;

/// Outcome of a lock operation. Denial is a result, not an error.
#[derive(Clone, Debug, PartialEq)]
pub struct LockResult {
    pub success: bool,
    pub lock: Option<FileLock>,
    pub reason: Option<String>,
}

impl LockResult {
    fn granted(lock: FileLock) -> Self {
        Self {
            success: true,
            lock: Some(lock),
            reason: None,
        }
    }

    fn ok(reason: Option<String>) -> Self {
        Self {
            success: true,
            lock: None,
            reason,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            lock: None,
            reason: Some(reason.into()),
        }
    }
}

/// Exclusive TTL-bounded per-path ownership within a session.
pub struct FileLockManager {
    store: Store,
    session_id: SessionId,
}

impl FileLockManager {
    #[must_use]
    pub fn new(store: Store, session_id: SessionId) -> Self {
        Self { store, session_id }
    }

    /// Acquire or extend a lock.
    ///
    /// Expired locks are reaped in passing. A re-acquire by the holder
    /// extends the TTL; a different live holder denies.
    #[instrument(skip(self), fields(path, agent_id = %agent_id))]
    pub fn acquire(
        &self,
        path: &str,
        agent_id: &AgentId,
        duration_seconds: Option<i64>,
    ) -> Result<LockResult, EngineError> {
        let duration = duration_seconds.unwrap_or(DEFAULT_LOCK_DURATION_SECONDS);
        let session_id = self.session_id.clone();
        let agent_id = agent_id.clone();
        let path = path.to_owned();

        self.store
            .transaction(move |s| {
                let existing = fetch_lock(s, &path)?;

                if let Some(existing) = existing {
                    if existing.is_expired() {
                        let _ = s.delete("file_locks", "path = ?", &[SqlValue::Text(path.clone())])?;
                    } else if existing.agent_id != agent_id {
                        return Ok(LockResult::denied(format!(
                            "File locked by agent {}",
                            existing.agent_id
                        )));
                    } else {
                        let new_expires = time::iso_after_seconds(duration);
                        let _ = s.update(
                            "file_locks",
                            &[("expires_at", SqlValue::Text(new_expires.clone()))],
                            "path = ?",
                            &[SqlValue::Text(path.clone())],
                        )?;
                        return Ok(LockResult::granted(FileLock {
                            expires_at: Some(new_expires),
                            ..existing
                        }));
                    }
                }

                let lock = FileLock {
                    path: path.clone(),
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                    acquired_at: time::now_iso(),
                    expires_at: Some(time::iso_after_seconds(duration)),
                };
                let _ = s.insert("file_locks", &lock.to_row()?)?;
                Ok(LockResult::granted(lock))
            })
            .map_err(EngineError::from)
    }

    /// Release a lock. Releasing an absent lock succeeds (idempotent);
    /// releasing another live agent's lock is denied.
    #[instrument(skip(self), fields(path, agent_id = %agent_id))]
    pub fn release(&self, path: &str, agent_id: &AgentId) -> Result<LockResult, EngineError> {
        let agent_id = agent_id.clone();
        let path = path.to_owned();

        self.store
            .transaction(move |s| {
                let Some(existing) = fetch_lock(s, &path)? else {
                    return Ok(LockResult::ok(Some(
                        "Lock not found (already released)".to_owned(),
                    )));
                };

                if !existing.is_expired() && existing.agent_id != agent_id {
                    return Ok(LockResult::denied(format!(
                        "Lock held by different agent: {}",
                        existing.agent_id
                    )));
                }

                let _ = s.delete("file_locks", "path = ?", &[SqlValue::Text(path.clone())])?;
                Ok(LockResult::ok(None))
            })
            .map_err(EngineError::from)
    }

    /// The live lock on a path, reaping it when expired.
    pub fn check(&self, path: &str) -> Result<Option<FileLock>, EngineError> {
        let path = path.to_owned();
        self.store
            .transaction(move |s| {
                let Some(lock) = fetch_lock(s, &path)? else {
                    return Ok(None);
                };
                if lock.is_expired() {
                    let _ = s.delete("file_locks", "path = ?", &[SqlValue::Text(path.clone())])?;
                    return Ok(None);
                }
                Ok(Some(lock))
            })
            .map_err(EngineError::from)
    }

    pub fn is_locked(&self, path: &str) -> Result<bool, EngineError> {
        Ok(self.check(path)?.is_some())
    }

    /// The agent holding a live lock on the path, if any.
    pub fn get_holder(&self, path: &str) -> Result<Option<AgentId>, EngineError> {
        Ok(self.check(path)?.map(|lock| lock.agent_id))
    }

    /// Live locks in this session, reaping expired ones in passing.
    pub fn list_locks(&self, agent_id: Option<&AgentId>) -> Result<Vec<FileLock>, EngineError> {
        let session_id = self.session_id.clone();
        let agent_id = agent_id.cloned();

        self.store
            .transaction(move |s| {
                let rows = match &agent_id {
                    Some(agent_id) => s.fetch_all(
                        "SELECT * FROM file_locks WHERE session_id = ? AND agent_id = ?",
                        &[
                            SqlValue::Text(session_id.as_str().to_owned()),
                            SqlValue::Text(agent_id.as_str().to_owned()),
                        ],
                    )?,
                    None => s.fetch_all(
                        "SELECT * FROM file_locks WHERE session_id = ?",
                        &[SqlValue::Text(session_id.as_str().to_owned())],
                    )?,
                };

                let mut live = Vec::new();
                for row in &rows {
                    let lock = FileLock::from_row(row)?;
                    if lock.is_expired() {
                        let _ = s.delete(
                            "file_locks",
                            "path = ?",
                            &[SqlValue::Text(lock.path.clone())],
                        )?;
                    } else {
                        live.push(lock);
                    }
                }
                Ok(live)
            })
            .map_err(EngineError::from)
    }

    /// Release everything an agent holds. Returns the count released.
    pub fn release_all_for_agent(&self, agent_id: &AgentId) -> Result<usize, EngineError> {
        self.store
            .delete(
                "file_locks",
                "session_id = ? AND agent_id = ?",
                &[
                    SqlValue::Text(self.session_id.as_str().to_owned()),
                    SqlValue::Text(agent_id.as_str().to_owned()),
                ],
            )
            .map_err(EngineError::from)
    }

    /// Release every lock in this session. Returns the count released.
    pub fn release_all(&self) -> Result<usize, EngineError> {
        self.store
            .delete(
                "file_locks",
                "session_id = ?",
                &[SqlValue::Text(self.session_id.as_str().to_owned())],
            )
            .map_err(EngineError::from)
    }
}

fn fetch_lock(store: &Store, path: &str) -> Result<Option<FileLock>, StoreError> {
    let row = store.fetch_one(
        "SELECT * FROM file_locks WHERE path = ?",
        &[SqlValue::Text(path.to_owned())],
    )?;
    row.as_ref().map(FileLock::from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> FileLockManager {
        FileLockManager::new(Store::in_memory().unwrap(), SessionId::from_raw("s1"))
    }

    fn a1() -> AgentId {
        AgentId::from_raw("agent-1")
    }

    fn a2() -> AgentId {
        AgentId::from_raw("agent-2")
    }

    #[test]
    fn acquire_then_extend_then_cross_agent_denial() {
        let manager = manager();

        // First acquisition.
        let first = manager.acquire("src/x.ts", &a1(), None).unwrap();
        assert!(first.success);
        let first_expiry = first.lock.unwrap().expires_at.unwrap();

        // Re-acquire by the same agent extends.
        let second = manager.acquire("src/x.ts", &a1(), Some(600)).unwrap();
        assert!(second.success);
        let second_expiry = second.lock.unwrap().expires_at.unwrap();
        assert!(second_expiry > first_expiry);

        // Different agent denied while live.
        let denied = manager.acquire("src/x.ts", &a2(), None).unwrap();
        assert!(!denied.success);
        assert!(denied.reason.unwrap().contains("locked by agent"));

        // Holder releases; the other agent may then acquire.
        let released = manager.release("src/x.ts", &a1()).unwrap();
        assert!(released.success);
        let taken = manager.acquire("src/x.ts", &a2(), None).unwrap();
        assert!(taken.success);
    }

    #[test]
    fn expired_lock_falls_to_next_acquirer() {
        let manager = manager();
        let _ = manager.acquire("src/y.ts", &a1(), Some(-10)).unwrap();

        let taken = manager.acquire("src/y.ts", &a2(), None).unwrap();
        assert!(taken.success);
        assert_eq!(taken.lock.unwrap().agent_id, a2());
    }

    #[test]
    fn release_is_idempotent() {
        let manager = manager();
        let _ = manager.acquire("src/z.ts", &a1(), None).unwrap();

        assert!(manager.release("src/z.ts", &a1()).unwrap().success);
        // Second release: nothing there, still success.
        assert!(manager.release("src/z.ts", &a1()).unwrap().success);
    }

    #[test]
    fn cross_agent_release_denied() {
        let manager = manager();
        let _ = manager.acquire("src/z.ts", &a1(), None).unwrap();

        let denied = manager.release("src/z.ts", &a2()).unwrap();
        assert!(!denied.success);
        assert!(denied.reason.unwrap().contains("different agent"));
        // Lock survives.
        assert!(manager.is_locked("src/z.ts").unwrap());
    }

    #[test]
    fn check_reaps_expired() {
        let manager = manager();
        let _ = manager.acquire("src/old.ts", &a1(), Some(-5)).unwrap();

        assert!(manager.check("src/old.ts").unwrap().is_none());
        // Row is gone, not just hidden.
        let rows = manager
            .store
            .fetch_all("SELECT * FROM file_locks", &[])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn list_locks_returns_only_live() {
        let manager = manager();
        let _ = manager.acquire("live.ts", &a1(), Some(300)).unwrap();
        let _ = manager.acquire("dead.ts", &a1(), Some(-5)).unwrap();

        let locks = manager.list_locks(None).unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].path, "live.ts");
        assert!(locks.iter().all(|l| !l.is_expired()));
    }

    #[test]
    fn list_locks_filters_by_agent() {
        let manager = manager();
        let _ = manager.acquire("one.ts", &a1(), None).unwrap();
        let _ = manager.acquire("two.ts", &a2(), None).unwrap();

        let mine = manager.list_locks(Some(&a1())).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].agent_id, a1());
    }

    #[test]
    fn release_all_for_agent_counts() {
        let manager = manager();
        let _ = manager.acquire("one.ts", &a1(), None).unwrap();
        let _ = manager.acquire("two.ts", &a1(), None).unwrap();
        let _ = manager.acquire("three.ts", &a2(), None).unwrap();

        assert_eq!(manager.release_all_for_agent(&a1()).unwrap(), 2);
        assert_eq!(manager.release_all().unwrap(), 1);
        assert!(manager.list_locks(None).unwrap().is_empty());
    }

    #[test]
    fn get_holder_identifies_owner() {
        let manager = manager();
        let _ = manager.acquire("src/x.ts", &a1(), None).unwrap();
        assert_eq!(manager.get_holder("src/x.ts").unwrap(), Some(a1()));
        assert_eq!(manager.get_holder("src/other.ts").unwrap(), None);
    }
}
