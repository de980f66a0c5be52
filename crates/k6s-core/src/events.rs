//! Audit event taxonomy.
//!
//! `EventType` is a closed set: rows with unknown types fail
//! deserialization rather than round-tripping silently.

use serde::{Deserialize, Serialize};

/// Types of audit events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // File operations
    FileCreate,
    FileModify,
    FileDelete,

    // Session lifecycle
    SessionStart,
    SessionPause,
    SessionResume,
    SessionComplete,
    SessionFail,

    // Agent lifecycle
    AgentSpawn,
    AgentComplete,
    AgentFail,

    // Task tracking
    TaskCreate,
    TaskUpdate,
    TaskComplete,

    // Sensitive-file annotation gates
    GateTriggered,
    GateApproved,
    GateDenied,
    GateExpired,

    // Boundary events
    BoundaryViolation,
    BoundaryCheck,

    // Lock events
    LockAcquired,
    LockReleased,
    LockDenied,

    // Context events
    ContextSaved,
    ContextLoaded,

    // Dependency manifest events
    DependencyAdded,
    DependencyRemoved,
    DependencyUpdated,

    // Tool use
    ToolUse,

    // Generic
    Log,
    System,
}

impl EventType {
    /// The stored string value (`snake_case`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileCreate => "file_create",
            Self::FileModify => "file_modify",
            Self::FileDelete => "file_delete",
            Self::SessionStart => "session_start",
            Self::SessionPause => "session_pause",
            Self::SessionResume => "session_resume",
            Self::SessionComplete => "session_complete",
            Self::SessionFail => "session_fail",
            Self::AgentSpawn => "agent_spawn",
            Self::AgentComplete => "agent_complete",
            Self::AgentFail => "agent_fail",
            Self::TaskCreate => "task_create",
            Self::TaskUpdate => "task_update",
            Self::TaskComplete => "task_complete",
            Self::GateTriggered => "gate_triggered",
            Self::GateApproved => "gate_approved",
            Self::GateDenied => "gate_denied",
            Self::GateExpired => "gate_expired",
            Self::BoundaryViolation => "boundary_violation",
            Self::BoundaryCheck => "boundary_check",
            Self::LockAcquired => "lock_acquired",
            Self::LockReleased => "lock_released",
            Self::LockDenied => "lock_denied",
            Self::ContextSaved => "context_saved",
            Self::ContextLoaded => "context_loaded",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::DependencyUpdated => "dependency_updated",
            Self::ToolUse => "tool_use",
            Self::Log => "log",
            Self::System => "system",
        }
    }

    /// User-facing display name. The stored value never changes; report
    /// and export consumers apply this mapping at render time.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::GateTriggered => "sensitive_needs_review",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}

/// Event severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn event_type_roundtrip() {
        for ty in [
            EventType::ToolUse,
            EventType::SessionStart,
            EventType::BoundaryViolation,
            EventType::DependencyUpdated,
            EventType::GateTriggered,
            EventType::LockDenied,
        ] {
            let parsed = EventType::from_str(ty.as_str()).unwrap();
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn unknown_event_type_rejected() {
        assert!(EventType::from_str("cost_reported").is_err());
        assert!(EventType::from_str("").is_err());
    }

    #[test]
    fn gate_triggered_display_mapping() {
        assert_eq!(EventType::GateTriggered.as_str(), "gate_triggered");
        assert_eq!(
            EventType::GateTriggered.display_name(),
            "sensitive_needs_review"
        );
        assert_eq!(EventType::ToolUse.display_name(), "tool_use");
    }

    #[test]
    fn severity_default_is_info() {
        assert_eq!(Severity::default(), Severity::Info);
    }

    #[test]
    fn severity_roundtrip() {
        for sev in [Severity::Info, Severity::Warning, Severity::Critical] {
            assert_eq!(Severity::from_str(sev.as_str()).unwrap(), sev);
        }
        assert!(Severity::from_str("fatal").is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&EventType::DependencyAdded).unwrap();
        assert_eq!(json, "\"dependency_added\"");
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
