//! Read-only report generation and chain verification over the log.
//!
//! The `gate_triggered → sensitive_needs_review` display mapping is
//! applied here, at render time only; stored event types never change.

use serde::Serialize;
use tracing::instrument;

use k6s_core::events::EventType;
use k6s_core::ids::SessionId;
use k6s_store::models::{Agent, AuditEvent, BoundaryViolation, Session};
use k6s_store::{SqlValue, Store};

use crate::errors::EngineError;
use crate::signing::{self, ChainVerification};

/// Structured report over one session's log.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session: Session,
    pub agents: Vec<Agent>,
    pub event_count: i64,
    /// Display-name event type → count, descending.
    pub events_by_type: Vec<(String, i64)>,
    /// Severity → count, descending.
    pub events_by_severity: Vec<(String, i64)>,
    pub violations: Vec<BoundaryViolation>,
    pub chain: Option<ChainVerification>,
}

/// Builds [`SessionReport`]s and runs chain verification.
pub struct ReportGenerator {
    store: Store,
}

impl ReportGenerator {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// All events of a session in ascending sequence order.
    pub fn events_in_order(&self, session_id: &SessionId) -> Result<Vec<AuditEvent>, EngineError> {
        let rows = self.store.fetch_all(
            "SELECT * FROM audit_events WHERE session_id = ? ORDER BY sequence",
            &[SqlValue::Text(session_id.as_str().to_owned())],
        )?;
        rows.iter()
            .map(|row| AuditEvent::from_row(row).map_err(EngineError::from))
            .collect()
    }

    /// Verify a session's HMAC chain against the given key.
    pub fn verify_session(
        &self,
        session_id: &SessionId,
        key: &[u8; signing::KEY_LEN],
    ) -> Result<ChainVerification, EngineError> {
        let events = self.events_in_order(session_id)?;
        signing::verify_chain(key, session_id.as_str(), &events).map_err(EngineError::from)
    }

    /// Build the full report. Chain verification is included when a key
    /// is supplied.
    #[instrument(skip(self, signing_key), fields(session_id = %session_id))]
    pub fn generate(
        &self,
        session_id: &SessionId,
        signing_key: Option<&[u8; signing::KEY_LEN]>,
    ) -> Result<SessionReport, EngineError> {
        let session_row = self.store.fetch_one(
            "SELECT * FROM sessions WHERE id = ?",
            &[SqlValue::Text(session_id.as_str().to_owned())],
        )?;
        let session = match session_row {
            Some(row) => Session::from_row(&row)?,
            None => {
                return Err(EngineError::Store(k6s_store::StoreError::NotFound(
                    format!("session {session_id}"),
                )))
            }
        };

        let agents = self
            .store
            .fetch_all(
                "SELECT * FROM agents WHERE session_id = ? ORDER BY spawned_at",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?
            .iter()
            .map(Agent::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let event_count = self
            .store
            .fetch_one(
                "SELECT COUNT(*) AS count FROM audit_events WHERE session_id = ?",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?
            .map_or(Ok(0), |r| r.integer("audit_events", "count"))?;

        let events_by_type = self
            .store
            .fetch_all(
                "SELECT event_type, COUNT(*) AS count FROM audit_events
                 WHERE session_id = ? GROUP BY event_type ORDER BY count DESC, event_type",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?
            .iter()
            .map(|row| {
                let raw = row.text("audit_events", "event_type")?;
                let display = raw
                    .parse::<EventType>()
                    .map_or(raw, |t| t.display_name().to_owned());
                Ok((display, row.integer("audit_events", "count")?))
            })
            .collect::<Result<Vec<_>, k6s_store::StoreError>>()?;

        let events_by_severity = self
            .store
            .fetch_all(
                "SELECT severity, COUNT(*) AS count FROM audit_events
                 WHERE session_id = ? GROUP BY severity ORDER BY count DESC, severity",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?
            .iter()
            .map(|row| {
                Ok((
                    row.text("audit_events", "severity")?,
                    row.integer("audit_events", "count")?,
                ))
            })
            .collect::<Result<Vec<_>, k6s_store::StoreError>>()?;

        let violations = self
            .store
            .fetch_all(
                "SELECT * FROM boundary_violations WHERE session_id = ?
                 ORDER BY timestamp DESC",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?
            .iter()
            .map(BoundaryViolation::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let chain = match signing_key {
            Some(key) => Some(self.verify_session(session_id, key)?),
            None => None,
        };

        Ok(SessionReport {
            session,
            agents,
            event_count,
            events_by_type,
            events_by_severity,
            violations,
            chain,
        })
    }
}

impl SessionReport {
    /// JSON export.
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(EngineError::from)
    }

    /// Markdown rendering for operators.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# Session Report: {}", self.session.id),
            String::new(),
            format!("**Objective**: {}", self.session.objective),
            format!("**State**: {}", self.session.state.as_str()),
            format!("**Started**: {}", self.session.started_at),
        ];
        if let Some(ended_at) = &self.session.ended_at {
            lines.push(format!("**Ended**: {ended_at}"));
        }
        if let Some(trace_id) = &self.session.trace_id {
            lines.push(format!("**Trace**: {trace_id}"));
        }
        lines.push(String::new());

        if !self.agents.is_empty() {
            lines.push("## Agents".to_owned());
            for agent in &self.agents {
                lines.push(format!(
                    "- **{}** ({}): {} — {} tool calls",
                    agent.name,
                    agent.role.as_str(),
                    agent.state.as_str(),
                    agent.tool_call_count
                ));
            }
            lines.push(String::new());
        }

        lines.push(format!("## Events ({})", self.event_count));
        for (event_type, count) in &self.events_by_type {
            lines.push(format!("- {event_type}: {count}"));
        }
        if !self.events_by_severity.is_empty() {
            lines.push(String::new());
            lines.push("By severity:".to_owned());
            for (severity, count) in &self.events_by_severity {
                lines.push(format!("- {severity}: {count}"));
            }
        }
        lines.push(String::new());

        if !self.violations.is_empty() {
            lines.push(format!("## Boundary Violations ({})", self.violations.len()));
            for violation in &self.violations {
                lines.push(format!(
                    "- {} `{}` — {} ({})",
                    violation.timestamp,
                    violation.file_path,
                    violation.violation_type.as_str(),
                    violation.enforcement_action.as_str()
                ));
            }
            lines.push(String::new());
        }

        if let Some(chain) = &self.chain {
            lines.push("## Audit Chain".to_owned());
            if chain.valid {
                lines.push(format!("Valid — {} events checked.", chain.events_checked));
            } else {
                lines.push(format!(
                    "INVALID — {} events checked, {} broken links:",
                    chain.events_checked,
                    chain.errors.len()
                ));
                for error in &chain.errors {
                    lines.push(format!(
                        "- sequence {}: {:?} — {}",
                        error.sequence, error.kind, error.detail
                    ));
                }
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}
