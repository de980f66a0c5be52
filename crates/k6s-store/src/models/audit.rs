use serde::{Deserialize, Serialize};

use k6s_core::events::{EventType, Severity};
use k6s_core::ids::{AgentId, EventId, SessionId};
use k6s_core::time;

use crate::error::StoreError;
use crate::row::{
    opt_text_value, parse_enum, parse_json_map, parse_json_strings, RowMap, RowValues, SqlValue,
};

/// The durable audit record. Append-only: no update, no delete outside
/// retention-driven pruning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub session_id: SessionId,
    /// Strictly increasing and gap-free within a session, starting at 1.
    pub sequence: i64,
    pub timestamp: String,
    pub agent_id: Option<AgentId>,
    pub event_type: EventType,
    pub action: String,
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
    pub files_affected: Option<Vec<String>>,
    pub gate_id: Option<String>,
    /// Chain link, lowercase hex. Present on all events of a signed
    /// session or on none.
    pub hmac: Option<String>,
    pub severity: Severity,
}

impl AuditEvent {
    /// A fresh unsigned event stamped with the current time.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        sequence: i64,
        event_type: EventType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            session_id,
            sequence,
            timestamp: time::now_iso(),
            agent_id: None,
            event_type,
            action: action.into(),
            details: None,
            files_affected: None,
            gate_id: None,
            hmac: None,
            severity: Severity::Info,
        }
    }

    /// The stored form of `details` (compact JSON), or `None`.
    pub fn details_json(&self) -> Result<Option<String>, StoreError> {
        match &self.details {
            Some(map) => Ok(Some(serde_json::to_string(map)?)),
            None => Ok(None),
        }
    }

    /// The stored form of `files_affected` (compact JSON array), or `None`.
    pub fn files_affected_json(&self) -> Result<Option<String>, StoreError> {
        match &self.files_affected {
            Some(files) => Ok(Some(serde_json::to_string(files)?)),
            None => Ok(None),
        }
    }

    pub fn to_row(&self) -> Result<RowValues, StoreError> {
        let details = match self.details_json()? {
            Some(s) => SqlValue::Text(s),
            None => SqlValue::Null,
        };
        let files = match self.files_affected_json()? {
            Some(s) => SqlValue::Text(s),
            None => SqlValue::Null,
        };
        Ok(vec![
            ("id", SqlValue::Text(self.id.as_str().to_owned())),
            ("sequence", SqlValue::Integer(self.sequence)),
            (
                "session_id",
                SqlValue::Text(self.session_id.as_str().to_owned()),
            ),
            (
                "agent_id",
                opt_text_value(self.agent_id.as_ref().map(AgentId::as_str)),
            ),
            ("timestamp", SqlValue::Text(self.timestamp.clone())),
            (
                "event_type",
                SqlValue::Text(self.event_type.as_str().to_owned()),
            ),
            ("action", SqlValue::Text(self.action.clone())),
            ("details", details),
            ("files_affected", files),
            ("gate_id", opt_text_value(self.gate_id.as_deref())),
            ("hmac", opt_text_value(self.hmac.as_deref())),
            (
                "severity",
                SqlValue::Text(self.severity.as_str().to_owned()),
            ),
        ])
    }

    pub fn from_row(row: &RowMap) -> Result<Self, StoreError> {
        const T: &str = "audit_events";
        let details = match row.opt_text(T, "details")? {
            Some(raw) => Some(parse_json_map(&raw, T, "details")?),
            None => None,
        };
        let files_affected = match row.opt_text(T, "files_affected")? {
            Some(raw) => Some(parse_json_strings(&raw, T, "files_affected")?),
            None => None,
        };
        Ok(Self {
            id: EventId::from_raw(row.text(T, "id")?),
            session_id: SessionId::from_raw(row.text(T, "session_id")?),
            sequence: row.integer(T, "sequence")?,
            timestamp: row.text(T, "timestamp")?,
            agent_id: row.opt_text(T, "agent_id")?.map(AgentId::from_raw),
            event_type: parse_enum(&row.text(T, "event_type")?, T, "event_type")?,
            action: row.text(T, "action")?,
            details,
            files_affected,
            gate_id: row.opt_text(T, "gate_id")?,
            hmac: row.opt_text(T, "hmac")?,
            severity: parse_enum(&row.text(T, "severity")?, T, "severity")?,
        })
    }

    /// One-line summary for report rendering.
    #[must_use]
    pub fn short_summary(&self) -> String {
        let actor = self
            .agent_id
            .as_ref()
            .map_or("system", |id| id.as_str());
        format!(
            "{} [{}] {}: {}",
            self.timestamp,
            actor,
            self.event_type.display_name(),
            self.action
        )
    }
}
