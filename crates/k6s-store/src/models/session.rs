use serde::{Deserialize, Serialize};

use k6s_core::ids::{SessionId, TraceId};
use k6s_core::time;

use crate::error::StoreError;
use crate::row::{opt_text_value, parse_enum, parse_json_map, RowMap, RowValues, SqlValue};

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Paused,
    Completed,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed sessions never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown session state: {other}")),
        }
    }
}

/// The unit of governed work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub objective: String,
    pub state: SessionState,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub parent_session_id: Option<SessionId>,
    /// Serialized governance configuration, webhook secrets redacted.
    pub config_snapshot: Option<String>,
    pub context_summary: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub operator: Option<String>,
    pub hostname: Option<String>,
    pub k6s_version: Option<String>,
    pub agent_runtime_version: Option<String>,
    pub git_branch: Option<String>,
    pub git_sha: Option<String>,
    pub git_dirty: bool,
    pub trace_id: Option<TraceId>,
}

impl Session {
    /// A fresh session in the `created` state with a new trace id.
    #[must_use]
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            objective: objective.into(),
            state: SessionState::Created,
            started_at: time::now_iso(),
            ended_at: None,
            parent_session_id: None,
            config_snapshot: None,
            context_summary: None,
            metadata: None,
            operator: None,
            hostname: None,
            k6s_version: None,
            agent_runtime_version: None,
            git_branch: None,
            git_sha: None,
            git_dirty: false,
            trace_id: Some(TraceId::new()),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Created | SessionState::Active)
    }

    pub fn mark_completed(&mut self, summary: Option<String>) {
        self.state = SessionState::Completed;
        self.ended_at = Some(time::now_iso());
        if summary.is_some() {
            self.context_summary = summary;
        }
    }

    pub fn mark_failed(&mut self, reason: Option<String>) {
        self.state = SessionState::Failed;
        self.ended_at = Some(time::now_iso());
        if let Some(reason) = reason {
            let metadata = self.metadata.get_or_insert_with(serde_json::Map::new);
            let _ = metadata.insert(
                "failure_reason".to_owned(),
                serde_json::Value::String(reason),
            );
        }
    }

    pub fn to_row(&self) -> Result<RowValues, StoreError> {
        let metadata = match &self.metadata {
            Some(map) => SqlValue::Text(serde_json::to_string(map)?),
            None => SqlValue::Null,
        };
        Ok(vec![
            ("id", SqlValue::Text(self.id.as_str().to_owned())),
            ("objective", SqlValue::Text(self.objective.clone())),
            ("state", SqlValue::Text(self.state.as_str().to_owned())),
            ("started_at", SqlValue::Text(self.started_at.clone())),
            ("ended_at", opt_text_value(self.ended_at.as_deref())),
            (
                "parent_session_id",
                opt_text_value(self.parent_session_id.as_ref().map(SessionId::as_str)),
            ),
            (
                "config_snapshot",
                opt_text_value(self.config_snapshot.as_deref()),
            ),
            (
                "context_summary",
                opt_text_value(self.context_summary.as_deref()),
            ),
            ("metadata", metadata),
            ("operator", opt_text_value(self.operator.as_deref())),
            ("hostname", opt_text_value(self.hostname.as_deref())),
            ("k6s_version", opt_text_value(self.k6s_version.as_deref())),
            (
                "agent_runtime_version",
                opt_text_value(self.agent_runtime_version.as_deref()),
            ),
            ("git_branch", opt_text_value(self.git_branch.as_deref())),
            ("git_sha", opt_text_value(self.git_sha.as_deref())),
            ("git_dirty", SqlValue::Integer(i64::from(self.git_dirty))),
            (
                "trace_id",
                opt_text_value(self.trace_id.as_ref().map(TraceId::as_str)),
            ),
        ])
    }

    pub fn from_row(row: &RowMap) -> Result<Self, StoreError> {
        const T: &str = "sessions";
        let state = parse_enum(&row.text(T, "state")?, T, "state")?;
        let metadata = match row.opt_text(T, "metadata")? {
            Some(raw) => Some(parse_json_map(&raw, T, "metadata")?),
            None => None,
        };
        Ok(Self {
            id: SessionId::from_raw(row.text(T, "id")?),
            objective: row.text(T, "objective")?,
            state,
            started_at: row.text(T, "started_at")?,
            ended_at: row.opt_text(T, "ended_at")?,
            parent_session_id: row.opt_text(T, "parent_session_id")?.map(SessionId::from_raw),
            config_snapshot: row.opt_text(T, "config_snapshot")?,
            context_summary: row.opt_text(T, "context_summary")?,
            metadata,
            operator: row.opt_text(T, "operator")?,
            hostname: row.opt_text(T, "hostname")?,
            k6s_version: row.opt_text(T, "k6s_version")?,
            agent_runtime_version: row.opt_text(T, "agent_runtime_version")?,
            git_branch: row.opt_text(T, "git_branch")?,
            git_sha: row.opt_text(T, "git_sha")?,
            git_dirty: row.flag(T, "git_dirty")?,
            trace_id: row.opt_text(T, "trace_id")?.map(TraceId::from_raw),
        })
    }
}
