//! Per-session append-only audit writer.
//!
//! One audit event is one transaction. Sequence and the previous chain
//! link are re-read inside the inserting transaction, so concurrent hook
//! processes contending for the same session keep the gap-free ordering
//! and chain invariants without application-level locking.
//!
//! Side effects (metrics, webhooks, plugins) fire strictly after the
//! transaction commits and never roll back the write.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use k6s_core::events::{EventType, Severity};
use k6s_core::ids::{AgentId, SessionId};
use k6s_plugin::PluginManager;
use k6s_store::models::AuditEvent;
use k6s_store::{SqlValue, Store};
use k6s_telemetry::{MetricsRecorder, AUDIT_EVENTS_TOTAL};
use k6s_webhook::{SessionContext, WebhookDispatcher};

use crate::errors::EngineError;
use crate::signing;

/// Parameters for one audit event.
#[derive(Clone, Debug)]
pub struct LogParams {
    pub event_type: EventType,
    pub action: String,
    pub agent_id: Option<AgentId>,
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
    pub files: Option<Vec<String>>,
    pub gate_id: Option<String>,
    pub severity: Option<Severity>,
}

impl LogParams {
    #[must_use]
    pub fn new(event_type: EventType, action: impl Into<String>) -> Self {
        Self {
            event_type,
            action: action.into(),
            agent_id: None,
            details: None,
            files: None,
            gate_id: None,
            severity: None,
        }
    }

    #[must_use]
    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn details(mut self, details: serde_json::Map<String, serde_json::Value>) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn files(mut self, files: Vec<String>) -> Self {
        self.files = Some(files);
        self
    }

    #[must_use]
    pub fn gate(mut self, gate_id: impl Into<String>) -> Self {
        self.gate_id = Some(gate_id.into());
        self
    }

    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Append-only writer for one session's audit log.
///
/// Handles (metrics, webhooks, plugins) are fixed at construction and
/// never change afterwards.
pub struct AuditLogger {
    store: Store,
    session_id: SessionId,
    trace_id: Option<String>,
    signing_key: Option<[u8; signing::KEY_LEN]>,
    // Caches of the last committed state; the transaction re-reads.
    sequence: AtomicI64,
    previous_hmac: Mutex<Option<String>>,
    metrics: Option<Arc<MetricsRecorder>>,
    webhooks: Option<Arc<WebhookDispatcher>>,
    plugins: Option<Arc<PluginManager>>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(store: Store, session_id: SessionId) -> Self {
        Self {
            store,
            session_id,
            trace_id: None,
            signing_key: None,
            sequence: AtomicI64::new(0),
            previous_hmac: Mutex::new(None),
            metrics: None,
            webhooks: None,
            plugins: None,
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    #[must_use]
    pub fn with_signing_key(mut self, key: Option<[u8; signing::KEY_LEN]>) -> Self {
        self.signing_key = key;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn with_webhooks(mut self, webhooks: Arc<WebhookDispatcher>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Load the current sequence and last chain link into the caches.
    pub fn start(&self) -> Result<(), EngineError> {
        let row = self.store.fetch_one(
            "SELECT COALESCE(MAX(sequence), 0) AS max_seq FROM audit_events WHERE session_id = ?",
            &[SqlValue::Text(self.session_id.as_str().to_owned())],
        )?;
        let max_seq = match &row {
            Some(r) => r.integer("audit_events", "max_seq")?,
            None => 0,
        };
        self.sequence.store(max_seq, Ordering::SeqCst);

        if self.signing_key.is_some() && max_seq > 0 {
            let row = self.store.fetch_one(
                "SELECT hmac FROM audit_events WHERE session_id = ? ORDER BY sequence DESC LIMIT 1",
                &[SqlValue::Text(self.session_id.as_str().to_owned())],
            )?;
            if let Some(r) = row {
                *self.previous_hmac.lock() = r.opt_text("audit_events", "hmac")?;
            }
        }
        Ok(())
    }

    /// Writes are synchronous; nothing to flush.
    pub fn stop(&self) {}

    /// Append one event. Persistence errors propagate; side-effect
    /// errors are logged and swallowed.
    #[instrument(skip(self, params), fields(session_id = %self.session_id, event_type = %params.event_type))]
    pub fn log(&self, params: LogParams) -> Result<AuditEvent, EngineError> {
        let session_id = self.session_id.clone();
        let trace_id = self.trace_id.clone();
        let signing_key = self.signing_key;

        let event = self.store.transaction(move |s| {
            let row = s.fetch_one(
                "SELECT COALESCE(MAX(sequence), 0) AS max_seq FROM audit_events WHERE session_id = ?",
                &[SqlValue::Text(session_id.as_str().to_owned())],
            )?;
            let max_seq = match &row {
                Some(r) => r.integer("audit_events", "max_seq")?,
                None => 0,
            };

            let mut event = AuditEvent::new(
                session_id.clone(),
                max_seq + 1,
                params.event_type,
                params.action.clone(),
            );
            event.agent_id = params.agent_id.clone();
            event.files_affected = params.files.clone();
            event.gate_id = params.gate_id.clone();
            event.severity = params.severity.unwrap_or_default();

            let mut details = params.details.clone().unwrap_or_default();
            if let Some(trace_id) = &trace_id {
                let _ = details.insert(
                    "trace_id".to_owned(),
                    serde_json::Value::String(trace_id.clone()),
                );
            }
            if !details.is_empty() || params.details.is_some() {
                event.details = Some(details);
            }

            if let Some(key) = &signing_key {
                let previous = s
                    .fetch_one(
                        "SELECT hmac FROM audit_events WHERE session_id = ? ORDER BY sequence DESC LIMIT 1",
                        &[SqlValue::Text(session_id.as_str().to_owned())],
                    )?
                    .and_then(|r| r.opt_text("audit_events", "hmac").transpose())
                    .transpose()?
                    .unwrap_or_else(|| signing::genesis(session_id.as_str()));
                event.hmac = Some(signing::compute_hmac(key, &previous, &event)?);
            }

            let _ = s.insert("audit_events", &event.to_row()?)?;
            Ok(event)
        })?;

        self.sequence.store(event.sequence, Ordering::SeqCst);
        *self.previous_hmac.lock() = event.hmac.clone();

        self.fire_side_effects(&event);
        Ok(event)
    }

    /// Convenience wrapper for file change events.
    pub fn log_file_change(
        &self,
        event_type: EventType,
        file_path: &str,
        agent_id: Option<AgentId>,
        details: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<AuditEvent, EngineError> {
        let mut params = LogParams::new(event_type, format!("{}: {file_path}", event_type.as_str()))
            .files(vec![file_path.to_owned()]);
        params.agent_id = agent_id;
        params.details = details;
        self.log(params)
    }

    /// Convenience wrapper for session lifecycle events.
    pub fn log_session_event(
        &self,
        event_type: EventType,
        action: impl Into<String>,
        details: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<AuditEvent, EngineError> {
        let mut params = LogParams::new(event_type, action);
        params.details = details;
        self.log(params)
    }

    /// Convenience wrapper for agent lifecycle events.
    pub fn log_agent_event(
        &self,
        event_type: EventType,
        agent_id: AgentId,
        action: impl Into<String>,
        details: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<AuditEvent, EngineError> {
        let mut params = LogParams::new(event_type, action).agent(agent_id);
        params.details = details;
        self.log(params)
    }

    fn fire_side_effects(&self, event: &AuditEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(
                AUDIT_EVENTS_TOTAL,
                &[
                    ("event_type", event.event_type.as_str()),
                    ("severity", event.severity.as_str()),
                ],
                1,
            );
        }

        if let Some(webhooks) = &self.webhooks {
            if tokio::runtime::Handle::try_current().is_ok() {
                webhooks.dispatch(
                    event,
                    &SessionContext {
                        session_id: self.session_id.as_str().to_owned(),
                        trace_id: self.trace_id.clone(),
                    },
                );
            } else {
                warn!("webhook dispatch skipped: no async runtime");
            }
        }

        if let Some(plugins) = &self.plugins {
            plugins.on_audit_event(event);
            match event.event_type {
                EventType::ToolUse => plugins.on_tool_use(event),
                EventType::GateTriggered => plugins.on_gate_trigger(event),
                _ => {}
            }
        }

        debug!(sequence = event.sequence, "audit event persisted");
    }

    /// Query this session's events, newest first.
    pub fn get_events(&self, filter: &EventFilter) -> Result<Vec<AuditEvent>, EngineError> {
        let mut sql = String::from("SELECT * FROM audit_events WHERE session_id = ?");
        let mut params: Vec<SqlValue> =
            vec![SqlValue::Text(self.session_id.as_str().to_owned())];

        if let Some(event_type) = filter.event_type {
            sql.push_str(" AND event_type = ?");
            params.push(SqlValue::Text(event_type.as_str().to_owned()));
        }
        if let Some(agent_id) = &filter.agent_id {
            sql.push_str(" AND agent_id = ?");
            params.push(SqlValue::Text(agent_id.as_str().to_owned()));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND timestamp > ?");
            params.push(SqlValue::Text(since.clone()));
        }
        if let Some(severity) = filter.severity {
            sql.push_str(" AND severity = ?");
            params.push(SqlValue::Text(severity.as_str().to_owned()));
        }
        if let Some(trace_id) = &filter.trace_id {
            sql.push_str(" AND json_extract(details, '$.trace_id') = ?");
            params.push(SqlValue::Text(trace_id.clone()));
        }

        sql.push_str(" ORDER BY sequence DESC LIMIT ? OFFSET ?");
        params.push(SqlValue::Integer(i64::from(filter.limit.unwrap_or(100))));
        params.push(SqlValue::Integer(i64::from(filter.offset.unwrap_or(0))));

        let rows = self.store.fetch_all(&sql, &params)?;
        rows.iter()
            .map(|row| AuditEvent::from_row(row).map_err(EngineError::from))
            .collect()
    }

    /// Total number of events for this session.
    pub fn get_event_count(&self) -> Result<i64, EngineError> {
        let row = self.store.fetch_one(
            "SELECT COUNT(*) AS count FROM audit_events WHERE session_id = ?",
            &[SqlValue::Text(self.session_id.as_str().to_owned())],
        )?;
        Ok(match row {
            Some(r) => r.integer("audit_events", "count")?,
            None => 0,
        })
    }
}

/// Filters for [`AuditLogger::get_events`].
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub event_type: Option<EventType>,
    pub agent_id: Option<AgentId>,
    pub since: Option<String>,
    pub severity: Option<Severity>,
    pub trace_id: Option<String>,
}

/// Outcome of a retention prune.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruneOutcome {
    pub events_deleted: usize,
    pub sessions_pruned: usize,
}

/// Delete audit events older than `before_date`, then cascade-delete
/// terminal sessions that ended before the cutoff and have no events
/// left. Dry-run reports the counts without mutating.
pub fn prune(store: &Store, before_date: &str, dry_run: bool) -> Result<PruneOutcome, EngineError> {
    let before = SqlValue::Text(before_date.to_owned());

    if dry_run {
        let events = store
            .fetch_one(
                "SELECT COUNT(*) AS count FROM audit_events WHERE timestamp < ?",
                &[before.clone()],
            )?
            .map_or(Ok(0), |r| r.integer("audit_events", "count"))?;
        let sessions = store
            .fetch_one(
                "SELECT COUNT(*) AS count FROM sessions s
                 WHERE s.state IN ('completed', 'failed') AND s.ended_at < ?
                   AND NOT EXISTS (SELECT 1 FROM audit_events e
                                   WHERE e.session_id = s.id AND e.timestamp >= ?)",
                &[before.clone(), before],
            )?
            .map_or(Ok(0), |r| r.integer("sessions", "count"))?;
        return Ok(PruneOutcome {
            events_deleted: usize::try_from(events).unwrap_or(0),
            sessions_pruned: usize::try_from(sessions).unwrap_or(0),
        });
    }

    store.transaction(|s| {
        let events_deleted = s.delete("audit_events", "timestamp < ?", &[before.clone()])?;

        let prunable = s.fetch_all(
            "SELECT id FROM sessions s
             WHERE s.state IN ('completed', 'failed') AND s.ended_at < ?
               AND NOT EXISTS (SELECT 1 FROM audit_events e WHERE e.session_id = s.id)",
            &[before.clone()],
        )?;

        let mut sessions_pruned = 0;
        for row in &prunable {
            let id = SqlValue::Text(row.text("sessions", "id")?);
            let _ = s.delete("boundary_violations", "session_id = ?", &[id.clone()])?;
            let _ = s.delete("file_locks", "session_id = ?", &[id.clone()])?;
            let _ = s.delete("context_store", "session_id = ?", &[id.clone()])?;
            let _ = s.delete("agents", "session_id = ?", &[id.clone()])?;
            let _ = s.delete("sessions", "id = ?", &[id])?;
            sessions_pruned += 1;
        }

        Ok(PruneOutcome {
            events_deleted,
            sessions_pruned,
        })
    })
    .map_err(EngineError::from)
}
