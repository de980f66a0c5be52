use serde::{Deserialize, Serialize};

use k6s_core::ids::{AgentId, SessionId, ViolationId};
use k6s_core::time;

use crate::error::StoreError;
use crate::row::{opt_text_value, parse_enum, parse_json_map, RowMap, RowValues, SqlValue};

/// Keyed persistent scratch value. `(key, session_id)` is the primary key;
/// saves upsert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub session_id: SessionId,
    pub agent_id: Option<AgentId>,
    pub value: serde_json::Value,
    pub updated_at: String,
}

impl ContextEntry {
    #[must_use]
    pub fn new(session_id: SessionId, key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            session_id,
            agent_id: None,
            value,
            updated_at: time::now_iso(),
        }
    }

    pub fn to_row(&self) -> Result<RowValues, StoreError> {
        Ok(vec![
            ("key", SqlValue::Text(self.key.clone())),
            (
                "session_id",
                SqlValue::Text(self.session_id.as_str().to_owned()),
            ),
            (
                "agent_id",
                opt_text_value(self.agent_id.as_ref().map(AgentId::as_str)),
            ),
            ("value", SqlValue::Text(serde_json::to_string(&self.value)?)),
            ("updated_at", SqlValue::Text(self.updated_at.clone())),
        ])
    }

    pub fn from_row(row: &RowMap) -> Result<Self, StoreError> {
        const T: &str = "context_store";
        let raw = row.text(T, "value")?;
        let value = serde_json::from_str(&raw).map_err(|e| StoreError::CorruptRow {
            table: T,
            column: "value",
            detail: format!("invalid JSON: {e}"),
        })?;
        Ok(Self {
            key: row.text(T, "key")?,
            session_id: SessionId::from_raw(row.text(T, "session_id")?),
            agent_id: row.opt_text(T, "agent_id")?.map(AgentId::from_raw),
            value,
            updated_at: row.text(T, "updated_at")?,
        })
    }
}

/// Exclusive ownership of a path. At most one live lock per path; a lock
/// is live iff `expires_at` is null or in the future.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileLock {
    pub path: String,
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub acquired_at: String,
    pub expires_at: Option<String>,
}

impl FileLock {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.as_deref().is_some_and(time::is_past)
    }

    pub fn to_row(&self) -> Result<RowValues, StoreError> {
        Ok(vec![
            ("path", SqlValue::Text(self.path.clone())),
            (
                "session_id",
                SqlValue::Text(self.session_id.as_str().to_owned()),
            ),
            (
                "agent_id",
                SqlValue::Text(self.agent_id.as_str().to_owned()),
            ),
            ("acquired_at", SqlValue::Text(self.acquired_at.clone())),
            ("expires_at", opt_text_value(self.expires_at.as_deref())),
        ])
    }

    pub fn from_row(row: &RowMap) -> Result<Self, StoreError> {
        const T: &str = "file_locks";
        Ok(Self {
            path: row.text(T, "path")?,
            session_id: SessionId::from_raw(row.text(T, "session_id")?),
            agent_id: AgentId::from_raw(row.text(T, "agent_id")?),
            acquired_at: row.text(T, "acquired_at")?,
            expires_at: row.opt_text(T, "expires_at")?,
        })
    }
}

/// Why a path access was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    ForbiddenPath,
    OutsideAllowed,
}

impl ViolationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenPath => "forbidden_path",
            Self::OutsideAllowed => "outside_allowed",
        }
    }
}

impl std::str::FromStr for ViolationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forbidden_path" => Ok(Self::ForbiddenPath),
            "outside_allowed" => Ok(Self::OutsideAllowed),
            other => Err(format!("unknown violation type: {other}")),
        }
    }
}

/// What the enforcer did about a violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Logged,
    Blocked,
    Reverted,
    RevertFailed,
}

impl EnforcementAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logged => "logged",
            Self::Blocked => "blocked",
            Self::Reverted => "reverted",
            Self::RevertFailed => "revert_failed",
        }
    }
}

impl std::str::FromStr for EnforcementAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logged" => Ok(Self::Logged),
            "blocked" => Ok(Self::Blocked),
            "reverted" => Ok(Self::Reverted),
            "revert_failed" => Ok(Self::RevertFailed),
            other => Err(format!("unknown enforcement action: {other}")),
        }
    }
}

/// Record of a denied or reverted access. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryViolation {
    pub id: ViolationId,
    pub session_id: SessionId,
    pub agent_id: Option<AgentId>,
    pub timestamp: String,
    pub file_path: String,
    pub violation_type: ViolationType,
    pub enforcement_action: EnforcementAction,
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
}

impl BoundaryViolation {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        file_path: impl Into<String>,
        violation_type: ViolationType,
        enforcement_action: EnforcementAction,
    ) -> Self {
        Self {
            id: ViolationId::new(),
            session_id,
            agent_id: None,
            timestamp: time::now_iso(),
            file_path: file_path.into(),
            violation_type,
            enforcement_action,
            details: None,
        }
    }

    pub fn to_row(&self) -> Result<RowValues, StoreError> {
        let details = match &self.details {
            Some(map) => SqlValue::Text(serde_json::to_string(map)?),
            None => SqlValue::Null,
        };
        Ok(vec![
            ("id", SqlValue::Text(self.id.as_str().to_owned())),
            (
                "session_id",
                SqlValue::Text(self.session_id.as_str().to_owned()),
            ),
            (
                "agent_id",
                opt_text_value(self.agent_id.as_ref().map(AgentId::as_str)),
            ),
            ("timestamp", SqlValue::Text(self.timestamp.clone())),
            ("file_path", SqlValue::Text(self.file_path.clone())),
            (
                "violation_type",
                SqlValue::Text(self.violation_type.as_str().to_owned()),
            ),
            (
                "enforcement_action",
                SqlValue::Text(self.enforcement_action.as_str().to_owned()),
            ),
            ("details", details),
        ])
    }

    pub fn from_row(row: &RowMap) -> Result<Self, StoreError> {
        const T: &str = "boundary_violations";
        let details = match row.opt_text(T, "details")? {
            Some(raw) => Some(parse_json_map(&raw, T, "details")?),
            None => None,
        };
        Ok(Self {
            id: ViolationId::from_raw(row.text(T, "id")?),
            session_id: SessionId::from_raw(row.text(T, "session_id")?),
            agent_id: row.opt_text(T, "agent_id")?.map(AgentId::from_raw),
            timestamp: row.text(T, "timestamp")?,
            file_path: row.text(T, "file_path")?,
            violation_type: parse_enum(&row.text(T, "violation_type")?, T, "violation_type")?,
            enforcement_action: parse_enum(
                &row.text(T, "enforcement_action")?,
                T,
                "enforcement_action",
            )?,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_map(values: RowValues) -> RowMap {
        let mut row = RowMap::new();
        for (column, value) in values {
            row.insert(column, value);
        }
        row
    }

    #[test]
    fn context_entry_roundtrip() {
        let mut entry = ContextEntry::new(
            SessionId::from_raw("s1"),
            "architecture-decision",
            serde_json::json!({"choice": "sqlite", "why": "single writer"}),
        );
        entry.agent_id = Some(AgentId::from_raw("a1"));
        let back = ContextEntry::from_row(&to_map(entry.to_row().unwrap())).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn context_entry_scalar_value() {
        let entry = ContextEntry::new(SessionId::from_raw("s1"), "count", serde_json::json!(3));
        let back = ContextEntry::from_row(&to_map(entry.to_row().unwrap())).unwrap();
        assert_eq!(back.value, serde_json::json!(3));
    }

    #[test]
    fn file_lock_roundtrip_and_expiry() {
        let lock = FileLock {
            path: "src/main.rs".to_owned(),
            session_id: SessionId::from_raw("s1"),
            agent_id: AgentId::from_raw("a1"),
            acquired_at: time::now_iso(),
            expires_at: Some(time::iso_after_seconds(300)),
        };
        assert!(!lock.is_expired());
        let back = FileLock::from_row(&to_map(lock.to_row().unwrap())).unwrap();
        assert_eq!(back, lock);

        let expired = FileLock {
            expires_at: Some(time::iso_after_seconds(-10)),
            ..lock
        };
        assert!(expired.is_expired());
    }

    #[test]
    fn lock_without_expiry_never_expires() {
        let lock = FileLock {
            path: "src/main.rs".to_owned(),
            session_id: SessionId::from_raw("s1"),
            agent_id: AgentId::from_raw("a1"),
            acquired_at: time::now_iso(),
            expires_at: None,
        };
        assert!(!lock.is_expired());
    }

    #[test]
    fn violation_roundtrip() {
        let mut violation = BoundaryViolation::new(
            SessionId::from_raw("s1"),
            ".env.local",
            ViolationType::ForbiddenPath,
            EnforcementAction::Reverted,
        );
        violation.agent_id = Some(AgentId::from_raw("a1"));
        let mut details = serde_json::Map::new();
        let _ = details.insert("reason".to_owned(), serde_json::json!("forbidden pattern"));
        violation.details = Some(details);
        let back = BoundaryViolation::from_row(&to_map(violation.to_row().unwrap())).unwrap();
        assert_eq!(back, violation);
    }

    #[test]
    fn violation_enums_parse() {
        assert_eq!(
            "revert_failed".parse::<EnforcementAction>().unwrap(),
            EnforcementAction::RevertFailed
        );
        assert!("escalated".parse::<EnforcementAction>().is_err());
        assert_eq!(
            "outside_allowed".parse::<ViolationType>().unwrap(),
            ViolationType::OutsideAllowed
        );
        assert!("resource_limit".parse::<ViolationType>().is_err());
    }
}
