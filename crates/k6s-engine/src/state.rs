//! Session, agent, and context lifecycle on top of the store.

use std::path::Path;
use std::process::Command;

use tracing::instrument;

use k6s_core::ids::{AgentId, SessionId, TraceId};
use k6s_core::time;
use k6s_store::models::{Agent, AgentRole, AgentState, ContextEntry, Session, SessionState};
use k6s_store::{SqlValue, Store};

use crate::errors::EngineError;

/// Inputs for [`StateManager::create_session`].
#[derive(Clone, Debug, Default)]
pub struct CreateSessionParams {
    pub objective: String,
    pub config_snapshot: Option<String>,
    pub parent_session_id: Option<SessionId>,
    pub operator: Option<String>,
    pub k6s_version: Option<String>,
    pub agent_runtime_version: Option<String>,
}

/// Inputs for [`StateManager::register_agent`].
#[derive(Clone, Debug)]
pub struct RegisterAgentParams {
    pub session_id: SessionId,
    pub name: String,
    pub role: AgentRole,
    pub specialization: Option<String>,
    pub boundary_config: Option<serde_json::Map<String, serde_json::Value>>,
}

impl RegisterAgentParams {
    #[must_use]
    pub fn new(session_id: SessionId, name: impl Into<String>) -> Self {
        Self {
            session_id,
            name: name.into(),
            role: AgentRole::Teammate,
            specialization: None,
            boundary_config: None,
        }
    }
}

/// Host environment captured onto a new session row.
#[derive(Clone, Debug, Default)]
pub struct SessionEnvironment {
    pub hostname: Option<String>,
    pub git_branch: Option<String>,
    pub git_sha: Option<String>,
    pub git_dirty: bool,
}

/// Capture hostname and version-control context for a project root.
/// Every probe is best-effort; a missing git repository leaves the git
/// fields empty.
#[must_use]
pub fn capture_environment(project_root: &Path) -> SessionEnvironment {
    let hostname = std::env::var("HOSTNAME").ok().or_else(|| {
        Command::new("hostname")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_owned())
    });

    let git = |args: &[&str]| -> Option<String> {
        Command::new("git")
            .arg("-C")
            .arg(project_root)
            .args(args)
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_owned())
    };

    let git_branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_sha = git(&["rev-parse", "HEAD"]);
    let git_dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());

    SessionEnvironment {
        hostname,
        git_branch,
        git_sha,
        git_dirty,
    }
}

/// Lifecycle of sessions, agents, and per-session key/value context.
pub struct StateManager {
    store: Store,
}

impl StateManager {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Create a session in the `created` state with a fresh trace id.
    #[instrument(skip(self, params, environment), fields(objective = %params.objective))]
    pub fn create_session(
        &self,
        params: CreateSessionParams,
        environment: SessionEnvironment,
    ) -> Result<Session, EngineError> {
        let mut session = Session::new(params.objective);
        session.config_snapshot = params.config_snapshot;
        session.parent_session_id = params.parent_session_id;
        session.operator = params.operator;
        session.k6s_version = params.k6s_version;
        session.agent_runtime_version = params.agent_runtime_version;
        session.hostname = environment.hostname;
        session.git_branch = environment.git_branch;
        session.git_sha = environment.git_sha;
        session.git_dirty = environment.git_dirty;

        let _ = self.store.insert("sessions", &session.to_row()?)?;
        Ok(session)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, EngineError> {
        let row = self.store.fetch_one(
            "SELECT * FROM sessions WHERE id = ?",
            &[SqlValue::Text(session_id.as_str().to_owned())],
        )?;
        row.as_ref().map(Session::from_row).transpose().map_err(EngineError::from)
    }

    /// Most recently started session, regardless of state.
    pub fn get_latest_session(&self) -> Result<Option<Session>, EngineError> {
        let row = self
            .store
            .fetch_one("SELECT * FROM sessions ORDER BY started_at DESC LIMIT 1", &[])?;
        row.as_ref().map(Session::from_row).transpose().map_err(EngineError::from)
    }

    /// The live session: first row in `created` or `active`, newest first.
    pub fn get_active_session(&self) -> Result<Option<Session>, EngineError> {
        let row = self.store.fetch_one(
            "SELECT * FROM sessions WHERE state IN ('created', 'active')
             ORDER BY started_at DESC LIMIT 1",
            &[],
        )?;
        row.as_ref().map(Session::from_row).transpose().map_err(EngineError::from)
    }

    pub fn list_sessions(
        &self,
        limit: u32,
        offset: u32,
        state: Option<SessionState>,
    ) -> Result<Vec<Session>, EngineError> {
        let rows = match state {
            Some(state) => self.store.fetch_all(
                "SELECT * FROM sessions WHERE state = ?
                 ORDER BY started_at DESC LIMIT ? OFFSET ?",
                &[
                    SqlValue::Text(state.as_str().to_owned()),
                    SqlValue::Integer(i64::from(limit)),
                    SqlValue::Integer(i64::from(offset)),
                ],
            )?,
            None => self.store.fetch_all(
                "SELECT * FROM sessions ORDER BY started_at DESC LIMIT ? OFFSET ?",
                &[
                    SqlValue::Integer(i64::from(limit)),
                    SqlValue::Integer(i64::from(offset)),
                ],
            )?,
        };
        rows.iter()
            .map(|row| Session::from_row(row).map_err(EngineError::from))
            .collect()
    }

    /// Write back every mutable session column.
    pub fn update_session(&self, session: &Session) -> Result<(), EngineError> {
        let row = session.to_row()?;
        let set: Vec<_> = row
            .into_iter()
            .filter(|(column, _)| *column != "id")
            .collect();
        let _ = self.store.update(
            "sessions",
            &set,
            "id = ?",
            &[SqlValue::Text(session.id.as_str().to_owned())],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn mark_session_active(&self, session_id: &SessionId) -> Result<(), EngineError> {
        self.set_session_state(session_id, SessionState::Active, None, None)
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn mark_session_paused(&self, session_id: &SessionId) -> Result<(), EngineError> {
        self.set_session_state(session_id, SessionState::Paused, None, None)
    }

    /// Terminal transition; sets `ended_at`.
    #[instrument(skip(self, summary), fields(session_id = %session_id))]
    pub fn mark_session_completed(
        &self,
        session_id: &SessionId,
        summary: Option<String>,
    ) -> Result<(), EngineError> {
        self.set_session_state(
            session_id,
            SessionState::Completed,
            Some(time::now_iso()),
            summary,
        )
    }

    /// Terminal transition; sets `ended_at` and records the reason.
    #[instrument(skip(self, reason), fields(session_id = %session_id))]
    pub fn mark_session_failed(
        &self,
        session_id: &SessionId,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(mut session) = self.get_session(session_id)? {
            session.mark_failed(reason);
            self.update_session(&session)?;
        }
        Ok(())
    }

    fn set_session_state(
        &self,
        session_id: &SessionId,
        state: SessionState,
        ended_at: Option<String>,
        summary: Option<String>,
    ) -> Result<(), EngineError> {
        let mut set: Vec<(&'static str, SqlValue)> =
            vec![("state", SqlValue::Text(state.as_str().to_owned()))];
        if let Some(ended_at) = ended_at {
            set.push(("ended_at", SqlValue::Text(ended_at)));
        }
        if let Some(summary) = summary {
            set.push(("context_summary", SqlValue::Text(summary)));
        }
        let _ = self.store.update(
            "sessions",
            &set,
            "id = ?",
            &[SqlValue::Text(session_id.as_str().to_owned())],
        )?;
        Ok(())
    }

    // ── Agents ──────────────────────────────────────────────────────────

    #[instrument(skip(self, params), fields(session_id = %params.session_id, name = %params.name))]
    pub fn register_agent(&self, params: RegisterAgentParams) -> Result<Agent, EngineError> {
        let mut agent = Agent::new(params.session_id, params.name);
        agent.role = params.role;
        agent.specialization = params.specialization;
        agent.boundary_config = params.boundary_config;
        let _ = self.store.insert("agents", &agent.to_row()?)?;
        Ok(agent)
    }

    pub fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>, EngineError> {
        let row = self.store.fetch_one(
            "SELECT * FROM agents WHERE id = ?",
            &[SqlValue::Text(agent_id.as_str().to_owned())],
        )?;
        row.as_ref().map(Agent::from_row).transpose().map_err(EngineError::from)
    }

    /// First agent with the given name, by spawn order. Duplicate names
    /// are permitted; lookups return the earliest.
    pub fn get_agent_by_name(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<Agent>, EngineError> {
        let row = self.store.fetch_one(
            "SELECT * FROM agents WHERE session_id = ? AND name = ?
             ORDER BY spawned_at LIMIT 1",
            &[
                SqlValue::Text(session_id.as_str().to_owned()),
                SqlValue::Text(name.to_owned()),
            ],
        )?;
        row.as_ref().map(Agent::from_row).transpose().map_err(EngineError::from)
    }

    pub fn get_agent_by_external_session_id(
        &self,
        external_session_id: &str,
    ) -> Result<Option<Agent>, EngineError> {
        let row = self.store.fetch_one(
            "SELECT * FROM agents WHERE external_session_id = ? LIMIT 1",
            &[SqlValue::Text(external_session_id.to_owned())],
        )?;
        row.as_ref().map(Agent::from_row).transpose().map_err(EngineError::from)
    }

    /// Correlate the most recently spawned unassigned agent with a host
    /// runtime session. Returns the agent after assignment, if any was
    /// available.
    pub fn assign_external_session_to_newest_unassigned(
        &self,
        session_id: &SessionId,
        external_session_id: &str,
    ) -> Result<Option<Agent>, EngineError> {
        self.store.transaction(|s| {
            let row = s.fetch_one(
                "SELECT id FROM agents
                 WHERE session_id = ? AND external_session_id IS NULL
                 ORDER BY spawned_at DESC LIMIT 1",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?;
            let Some(row) = row else {
                return Ok(None);
            };
            let agent_id = row.text("agents", "id")?;
            let _ = s.update(
                "agents",
                &[(
                    "external_session_id",
                    SqlValue::Text(external_session_id.to_owned()),
                )],
                "id = ?",
                &[SqlValue::Text(agent_id.clone())],
            )?;
            let row = s.fetch_one(
                "SELECT * FROM agents WHERE id = ?",
                &[SqlValue::Text(agent_id)],
            )?;
            row.as_ref().map(Agent::from_row).transpose()
        })
        .map_err(EngineError::from)
    }

    pub fn list_agents(&self, session_id: &SessionId) -> Result<Vec<Agent>, EngineError> {
        let rows = self.store.fetch_all(
            "SELECT * FROM agents WHERE session_id = ? ORDER BY spawned_at",
            &[SqlValue::Text(session_id.as_str().to_owned())],
        )?;
        rows.iter()
            .map(|row| Agent::from_row(row).map_err(EngineError::from))
            .collect()
    }

    pub fn update_agent(&self, agent: &Agent) -> Result<(), EngineError> {
        let row = agent.to_row()?;
        let set: Vec<_> = row
            .into_iter()
            .filter(|(column, _)| *column != "id")
            .collect();
        let _ = self.store.update(
            "agents",
            &set,
            "id = ?",
            &[SqlValue::Text(agent.id.as_str().to_owned())],
        )?;
        Ok(())
    }

    pub fn mark_agent_state(
        &self,
        agent_id: &AgentId,
        state: AgentState,
    ) -> Result<(), EngineError> {
        let _ = self.store.update(
            "agents",
            &[("state", SqlValue::Text(state.as_str().to_owned()))],
            "id = ?",
            &[SqlValue::Text(agent_id.as_str().to_owned())],
        )?;
        Ok(())
    }

    /// Atomic in-database increment. Returns the resulting count.
    pub fn increment_tool_call_count(&self, agent_id: &AgentId) -> Result<i64, EngineError> {
        self.store.transaction(|s| {
            let _ = s.execute(
                "UPDATE agents SET tool_call_count = tool_call_count + 1 WHERE id = ?",
                &[SqlValue::Text(agent_id.as_str().to_owned())],
            )?;
            let row = s.fetch_one(
                "SELECT tool_call_count FROM agents WHERE id = ?",
                &[SqlValue::Text(agent_id.as_str().to_owned())],
            )?;
            match row {
                Some(r) => r.integer("agents", "tool_call_count"),
                None => Err(k6s_store::StoreError::NotFound(format!(
                    "agent {agent_id}"
                ))),
            }
        })
        .map_err(EngineError::from)
    }

    // ── Context ─────────────────────────────────────────────────────────

    /// Upsert on `(session_id, key)`.
    pub fn save_context(
        &self,
        session_id: &SessionId,
        key: &str,
        value: serde_json::Value,
        agent_id: Option<AgentId>,
    ) -> Result<ContextEntry, EngineError> {
        let mut entry = ContextEntry::new(session_id.clone(), key, value);
        entry.agent_id = agent_id;
        self.store.insert_or_replace("context_store", &entry.to_row()?)?;
        Ok(entry)
    }

    pub fn load_context(
        &self,
        session_id: &SessionId,
        key: &str,
    ) -> Result<Option<ContextEntry>, EngineError> {
        let row = self.store.fetch_one(
            "SELECT * FROM context_store WHERE session_id = ? AND key = ?",
            &[
                SqlValue::Text(session_id.as_str().to_owned()),
                SqlValue::Text(key.to_owned()),
            ],
        )?;
        row.as_ref().map(ContextEntry::from_row).transpose().map_err(EngineError::from)
    }

    pub fn load_all_context(
        &self,
        session_id: &SessionId,
        agent_id: Option<&AgentId>,
    ) -> Result<Vec<ContextEntry>, EngineError> {
        let rows = match agent_id {
            Some(agent_id) => self.store.fetch_all(
                "SELECT * FROM context_store WHERE session_id = ? AND agent_id = ? ORDER BY key",
                &[
                    SqlValue::Text(session_id.as_str().to_owned()),
                    SqlValue::Text(agent_id.as_str().to_owned()),
                ],
            )?,
            None => self.store.fetch_all(
                "SELECT * FROM context_store WHERE session_id = ? ORDER BY key",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?,
        };
        rows.iter()
            .map(|row| ContextEntry::from_row(row).map_err(EngineError::from))
            .collect()
    }

    pub fn delete_context(&self, session_id: &SessionId, key: &str) -> Result<(), EngineError> {
        let _ = self.store.delete(
            "context_store",
            "session_id = ? AND key = ?",
            &[
                SqlValue::Text(session_id.as_str().to_owned()),
                SqlValue::Text(key.to_owned()),
            ],
        )?;
        Ok(())
    }

    // ── Resumption ──────────────────────────────────────────────────────

    /// Markdown block for resuming a session: prior objective, active
    /// agents, and the first ten saved context entries (values truncated
    /// to 100 chars). Empty string for an unknown session.
    pub fn generate_resume_context(&self, session_id: &SessionId) -> Result<String, EngineError> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(String::new());
        };
        let agents = self.list_agents(session_id)?;
        let entries = self.load_all_context(session_id, None)?;

        let mut lines = vec![
            "## Previous Session Context".to_owned(),
            String::new(),
            format!("**Objective**: {}", session.objective),
            format!("**Started**: {}", session.started_at),
            String::new(),
        ];

        if let Some(summary) = &session.context_summary {
            lines.push("### Session Summary".to_owned());
            lines.push(summary.clone());
            lines.push(String::new());
        }

        if !agents.is_empty() {
            lines.push("### Active Agents".to_owned());
            for agent in &agents {
                let spec = agent
                    .specialization
                    .as_deref()
                    .map(|s| format!(" ({s})"))
                    .unwrap_or_default();
                lines.push(format!(
                    "- **{}**{spec}: {}",
                    agent.name,
                    agent.state.as_str()
                ));
            }
            lines.push(String::new());
        }

        if !entries.is_empty() {
            lines.push("### Saved Context".to_owned());
            for entry in entries.iter().take(10) {
                let rendered = match &entry.value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let mut preview: String = rendered.chars().take(100).collect();
                if rendered.chars().count() > 100 {
                    preview.push_str("...");
                }
                lines.push(format!("- **{}**: {preview}", entry.key));
            }
            lines.push(String::new());
        }

        Ok(lines.join("\n"))
    }

    /// Fresh trace id for a resumed session.
    #[must_use]
    pub fn new_trace_id() -> TraceId {
        TraceId::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> StateManager {
        StateManager::new(Store::in_memory().unwrap())
    }

    fn create(manager: &StateManager, objective: &str) -> Session {
        manager
            .create_session(
                CreateSessionParams {
                    objective: objective.to_owned(),
                    ..Default::default()
                },
                SessionEnvironment::default(),
            )
            .unwrap()
    }

    #[test]
    fn create_and_get_session() {
        let manager = manager();
        let session = create(&manager, "build the parser");
        let fetched = manager.get_session(&session.id).unwrap().unwrap();
        assert_eq!(fetched, session);
        assert_eq!(fetched.state, SessionState::Created);
        assert!(fetched.trace_id.is_some());
    }

    #[test]
    fn get_unknown_session_is_none() {
        let manager = manager();
        assert!(manager
            .get_session(&SessionId::from_raw("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn active_session_lookup() {
        let manager = manager();
        let first = create(&manager, "first");
        manager
            .mark_session_completed(&first.id, Some("done".to_owned()))
            .unwrap();
        let second = create(&manager, "second");

        let active = manager.get_active_session().unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let completed = manager.get_session(&first.id).unwrap().unwrap();
        assert_eq!(completed.state, SessionState::Completed);
        assert!(completed.ended_at.is_some());
        assert!(completed.ended_at.as_deref().unwrap() >= completed.started_at.as_str());
        assert_eq!(completed.context_summary.as_deref(), Some("done"));
    }

    #[test]
    fn list_sessions_with_state_filter() {
        let manager = manager();
        let first = create(&manager, "first");
        let _ = create(&manager, "second");
        manager.mark_session_completed(&first.id, None).unwrap();

        let all = manager.list_sessions(20, 0, None).unwrap();
        assert_eq!(all.len(), 2);

        let completed = manager
            .list_sessions(20, 0, Some(SessionState::Completed))
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, first.id);
    }

    #[test]
    fn mark_failed_records_reason() {
        let manager = manager();
        let session = create(&manager, "doomed");
        manager
            .mark_session_failed(&session.id, Some("runtime died".to_owned()))
            .unwrap();
        let failed = manager.get_session(&session.id).unwrap().unwrap();
        assert_eq!(failed.state, SessionState::Failed);
        assert!(failed.ended_at.is_some());
        assert_eq!(
            failed.metadata.unwrap()["failure_reason"],
            serde_json::json!("runtime died")
        );
    }

    #[test]
    fn register_and_find_agent_by_name() {
        let manager = manager();
        let session = create(&manager, "work");
        let agent = manager
            .register_agent(RegisterAgentParams::new(session.id.clone(), "frontend-dev"))
            .unwrap();
        assert_eq!(agent.tool_call_count, 0);

        let found = manager
            .get_agent_by_name(&session.id, "frontend-dev")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, agent.id);
        assert!(manager
            .get_agent_by_name(&session.id, "backend-dev")
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_names_return_first_spawned() {
        let manager = manager();
        let session = create(&manager, "work");
        let mut first = Agent::new(session.id.clone(), "worker");
        first.spawned_at = "2026-01-01T00:00:00.000Z".to_owned();
        let mut second = Agent::new(session.id.clone(), "worker");
        second.spawned_at = "2026-01-01T00:00:01.000Z".to_owned();
        let _ = manager.store.insert("agents", &first.to_row().unwrap()).unwrap();
        let _ = manager.store.insert("agents", &second.to_row().unwrap()).unwrap();

        let found = manager
            .get_agent_by_name(&session.id, "worker")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn external_session_assignment_picks_newest_unassigned() {
        let manager = manager();
        let session = create(&manager, "work");
        let mut older = Agent::new(session.id.clone(), "older");
        older.spawned_at = "2026-01-01T00:00:00.000Z".to_owned();
        let mut newer = Agent::new(session.id.clone(), "newer");
        newer.spawned_at = "2026-01-01T00:00:05.000Z".to_owned();
        let _ = manager.store.insert("agents", &older.to_row().unwrap()).unwrap();
        let _ = manager.store.insert("agents", &newer.to_row().unwrap()).unwrap();

        let assigned = manager
            .assign_external_session_to_newest_unassigned(&session.id, "ext-1")
            .unwrap()
            .unwrap();
        assert_eq!(assigned.id, newer.id);
        assert_eq!(assigned.external_session_id.as_deref(), Some("ext-1"));

        let by_ext = manager
            .get_agent_by_external_session_id("ext-1")
            .unwrap()
            .unwrap();
        assert_eq!(by_ext.id, newer.id);

        // Next assignment falls to the remaining unassigned agent.
        let next = manager
            .assign_external_session_to_newest_unassigned(&session.id, "ext-2")
            .unwrap()
            .unwrap();
        assert_eq!(next.id, older.id);

        // Nothing left to assign.
        assert!(manager
            .assign_external_session_to_newest_unassigned(&session.id, "ext-3")
            .unwrap()
            .is_none());
    }

    #[test]
    fn tool_call_count_only_increases() {
        let manager = manager();
        let session = create(&manager, "work");
        let agent = manager
            .register_agent(RegisterAgentParams::new(session.id.clone(), "primary"))
            .unwrap();

        assert_eq!(manager.increment_tool_call_count(&agent.id).unwrap(), 1);
        assert_eq!(manager.increment_tool_call_count(&agent.id).unwrap(), 2);
        assert_eq!(manager.increment_tool_call_count(&agent.id).unwrap(), 3);
    }

    #[test]
    fn increment_unknown_agent_fails() {
        let manager = manager();
        assert!(manager
            .increment_tool_call_count(&AgentId::from_raw("missing"))
            .is_err());
    }

    #[test]
    fn context_upsert_and_load() {
        let manager = manager();
        let session = create(&manager, "work");

        let _ = manager
            .save_context(&session.id, "plan", serde_json::json!("v1"), None)
            .unwrap();
        let _ = manager
            .save_context(&session.id, "plan", serde_json::json!("v2"), None)
            .unwrap();

        let loaded = manager.load_context(&session.id, "plan").unwrap().unwrap();
        assert_eq!(loaded.value, serde_json::json!("v2"));

        let all = manager.load_all_context(&session.id, None).unwrap();
        assert_eq!(all.len(), 1);

        manager.delete_context(&session.id, "plan").unwrap();
        assert!(manager.load_context(&session.id, "plan").unwrap().is_none());
    }

    #[test]
    fn context_filtered_by_agent() {
        let manager = manager();
        let session = create(&manager, "work");
        let agent = manager
            .register_agent(RegisterAgentParams::new(session.id.clone(), "primary"))
            .unwrap();

        let _ = manager
            .save_context(&session.id, "mine", serde_json::json!(1), Some(agent.id.clone()))
            .unwrap();
        let _ = manager
            .save_context(&session.id, "shared", serde_json::json!(2), None)
            .unwrap();

        let mine = manager
            .load_all_context(&session.id, Some(&agent.id))
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, "mine");
    }

    #[test]
    fn resume_context_markdown() {
        let manager = manager();
        let session = create(&manager, "migrate the database layer");
        let _ = manager
            .register_agent(RegisterAgentParams {
                specialization: Some("sql".to_owned()),
                ..RegisterAgentParams::new(session.id.clone(), "db-expert")
            })
            .unwrap();
        let long_value = "x".repeat(150);
        let _ = manager
            .save_context(&session.id, "notes", serde_json::json!(long_value), None)
            .unwrap();

        let markdown = manager.generate_resume_context(&session.id).unwrap();
        assert!(markdown.contains("**Objective**: migrate the database layer"));
        assert!(markdown.contains("- **db-expert** (sql): active"));
        assert!(markdown.contains("..."));
        // Truncated to 100 chars plus ellipsis.
        assert!(!markdown.contains(&"x".repeat(101)));
    }

    #[test]
    fn resume_context_unknown_session_is_empty() {
        let manager = manager();
        let markdown = manager
            .generate_resume_context(&SessionId::from_raw("missing"))
            .unwrap();
        assert!(markdown.is_empty());
    }

    #[test]
    fn update_session_roundtrips() {
        let manager = manager();
        let mut session = create(&manager, "work");
        session.objective = "revised objective".to_owned();
        session.git_branch = Some("feature/x".to_owned());
        manager.update_session(&session).unwrap();

        let fetched = manager.get_session(&session.id).unwrap().unwrap();
        assert_eq!(fetched, session);
    }
}
