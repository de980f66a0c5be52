use serde::{Deserialize, Serialize};

use k6s_core::ids::{AgentId, SessionId};
use k6s_core::time;

use crate::error::StoreError;
use crate::row::{opt_text_value, parse_enum, parse_json_map, RowMap, RowValues, SqlValue};

/// Agent roles within a team.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Lead,
    #[default]
    Teammate,
}

impl AgentRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Teammate => "teammate",
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(Self::Lead),
            "teammate" => Ok(Self::Teammate),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}

/// Agent lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Active,
    Idle,
    Completed,
    Failed,
}

impl AgentState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AgentState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown agent state: {other}")),
        }
    }
}

/// An identified actor within a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub session_id: SessionId,
    pub name: String,
    pub role: AgentRole,
    pub specialization: Option<String>,
    pub state: AgentState,
    pub spawned_at: String,
    pub boundary_config: Option<serde_json::Map<String, serde_json::Value>>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Correlates hook invocations with the host runtime's session.
    pub external_session_id: Option<String>,
    /// Monotone; only ever incremented.
    pub tool_call_count: i64,
}

impl Agent {
    #[must_use]
    pub fn new(session_id: SessionId, name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            session_id,
            name: name.into(),
            role: AgentRole::Teammate,
            specialization: None,
            state: AgentState::Active,
            spawned_at: time::now_iso(),
            boundary_config: None,
            metadata: None,
            external_session_id: None,
            tool_call_count: 0,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, AgentState::Active | AgentState::Idle)
    }

    pub fn to_row(&self) -> Result<RowValues, StoreError> {
        let boundary_config = match &self.boundary_config {
            Some(map) => SqlValue::Text(serde_json::to_string(map)?),
            None => SqlValue::Null,
        };
        let metadata = match &self.metadata {
            Some(map) => SqlValue::Text(serde_json::to_string(map)?),
            None => SqlValue::Null,
        };
        Ok(vec![
            ("id", SqlValue::Text(self.id.as_str().to_owned())),
            (
                "session_id",
                SqlValue::Text(self.session_id.as_str().to_owned()),
            ),
            ("name", SqlValue::Text(self.name.clone())),
            ("role", SqlValue::Text(self.role.as_str().to_owned())),
            (
                "specialization",
                opt_text_value(self.specialization.as_deref()),
            ),
            ("state", SqlValue::Text(self.state.as_str().to_owned())),
            ("spawned_at", SqlValue::Text(self.spawned_at.clone())),
            ("boundary_config", boundary_config),
            ("metadata", metadata),
            (
                "external_session_id",
                opt_text_value(self.external_session_id.as_deref()),
            ),
            ("tool_call_count", SqlValue::Integer(self.tool_call_count)),
        ])
    }

    pub fn from_row(row: &RowMap) -> Result<Self, StoreError> {
        const T: &str = "agents";
        let boundary_config = match row.opt_text(T, "boundary_config")? {
            Some(raw) => Some(parse_json_map(&raw, T, "boundary_config")?),
            None => None,
        };
        let metadata = match row.opt_text(T, "metadata")? {
            Some(raw) => Some(parse_json_map(&raw, T, "metadata")?),
            None => None,
        };
        Ok(Self {
            id: AgentId::from_raw(row.text(T, "id")?),
            session_id: SessionId::from_raw(row.text(T, "session_id")?),
            name: row.text(T, "name")?,
            role: parse_enum(&row.text(T, "role")?, T, "role")?,
            specialization: row.opt_text(T, "specialization")?,
            state: parse_enum(&row.text(T, "state")?, T, "state")?,
            spawned_at: row.text(T, "spawned_at")?,
            boundary_config,
            metadata,
            external_session_id: row.opt_text(T, "external_session_id")?,
            tool_call_count: row.integer(T, "tool_call_count")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(agent: &Agent) -> Agent {
        let values = agent.to_row().unwrap();
        let mut row = RowMap::new();
        for (column, value) in values {
            row.insert(column, value);
        }
        Agent::from_row(&row).unwrap()
    }

    #[test]
    fn new_agent_defaults() {
        let agent = Agent::new(SessionId::from_raw("s1"), "primary");
        assert_eq!(agent.role, AgentRole::Teammate);
        assert_eq!(agent.state, AgentState::Active);
        assert_eq!(agent.tool_call_count, 0);
        assert!(agent.is_active());
    }

    #[test]
    fn row_roundtrip_minimal() {
        let agent = Agent::new(SessionId::from_raw("s1"), "primary");
        assert_eq!(roundtrip(&agent), agent);
    }

    #[test]
    fn row_roundtrip_full() {
        let mut agent = Agent::new(SessionId::from_raw("s1"), "frontend-dev");
        agent.role = AgentRole::Lead;
        agent.specialization = Some("react".to_owned());
        agent.state = AgentState::Idle;
        agent.external_session_id = Some("ext-42".to_owned());
        agent.tool_call_count = 17;
        let mut boundary = serde_json::Map::new();
        let _ = boundary.insert("pattern".to_owned(), serde_json::json!("frontend-*"));
        agent.boundary_config = Some(boundary);
        assert_eq!(roundtrip(&agent), agent);
    }

    #[test]
    fn corrupt_role_rejected() {
        let agent = Agent::new(SessionId::from_raw("s1"), "primary");
        let values = agent.to_row().unwrap();
        let mut row = RowMap::new();
        for (column, value) in values {
            row.insert(column, value);
        }
        row.insert("role", SqlValue::Text("manager".into()));
        assert!(matches!(
            Agent::from_row(&row),
            Err(StoreError::CorruptRow { column: "role", .. })
        ));
    }
}
