//! The post-tool-use pipeline and its sibling hook handlers.
//!
//! Each handler is invoked in a short-lived subprocess. Control flow is
//! early-return: an absent session, oversized payload, or internal tool
//! yields an explicit [`PipelineOutcome::NoOp`], never an error and never a
//! silent swallow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info_span, instrument, warn};

use k6s_core::config::{Enforcement, GovernanceConfig, ReviewRuleConfig};
use k6s_core::events::{EventType, Severity};
use k6s_engine::audit::{AuditLogger, LogParams};
use k6s_engine::boundaries::BoundaryEnforcer;
use k6s_engine::locks::FileLockManager;
use k6s_engine::revert;
use k6s_engine::session_file::SessionFile;
use k6s_engine::signing;
use k6s_engine::state::{RegisterAgentParams, StateManager};
use k6s_store::models::{Agent, AgentState, AuditEvent, EnforcementAction, Session};
use k6s_store::Store;
use k6s_telemetry::{MetricsRecorder, TOOL_DURATION_SECONDS};
use k6s_webhook::WebhookDispatcher;

use crate::errors::HookError;
use crate::payload::HookPayload;
use crate::project::resolve_project_root;
use crate::{deps, files, severity};

/// Tools that are runtime bookkeeping, not governed work.
const INTERNAL_TOOLS: &[&str] = &[
    "TaskCreate",
    "TaskUpdate",
    "TaskDone",
    "TaskDelete",
    "TodoRead",
    "TodoWrite",
];

/// Tools that can mutate the working tree.
const WRITE_LIKE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "Bash"];

/// Name of the implicit agent used when no explicit identity matches.
const PRIMARY_AGENT: &str = "primary";

/// Cap on tool-input bytes stored in event details.
const MAX_INPUT_DETAIL_CHARS: usize = 2000;

/// Cap on violating content stored in violation details.
const MAX_ORIGINAL_CONTENT_CHARS: usize = 500;

/// Result of running a hook handler.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The primary event written by the handler.
    Completed(Box<AuditEvent>),
    /// Nothing to do; the reason is for logs only.
    NoOp(String),
}

impl PipelineOutcome {
    fn noop(reason: impl Into<String>) -> Self {
        Self::NoOp(reason.into())
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp(_))
    }
}

/// A hook invocation bound to its governed project and live session.
pub struct Pipeline {
    project_root: PathBuf,
    store: Store,
    session: Session,
    config: GovernanceConfig,
    signing_key: Option<[u8; signing::KEY_LEN]>,
    metrics: Option<Arc<MetricsRecorder>>,
    webhooks: Option<Arc<WebhookDispatcher>>,
}

impl Pipeline {
    /// Resolve the governed project for a working directory. `None` when
    /// no live session is found anywhere nearby.
    pub fn discover(cwd: &Path) -> Result<Option<Self>, HookError> {
        match resolve_project_root(cwd) {
            Some(root) => Self::for_project(&root),
            None => Ok(None),
        }
    }

    /// Bind to a specific project root. `None` when the session flag or
    /// the session row is missing.
    pub fn for_project(project_root: &Path) -> Result<Option<Self>, HookError> {
        let project_root = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        let khoregos_dir = project_root.join(".khoregos");
        let Some(state) = SessionFile::new(&khoregos_dir).read() else {
            return Ok(None);
        };

        let store = Store::new(khoregos_dir.join("k6s.db"));
        store.connect()?;

        let manager = StateManager::new(store.clone());
        let Some(session) = manager.get_session(&state.session_id.clone().into())? else {
            warn!(session_id = %state.session_id, "state file names an unknown session");
            return Ok(None);
        };

        let config = session
            .config_snapshot
            .as_deref()
            .map(GovernanceConfig::from_snapshot)
            .unwrap_or_default();

        let signing_key = signing::load_key(&khoregos_dir).map_err(k6s_engine::EngineError::from)?;

        let webhooks = if config.webhooks.is_empty() {
            None
        } else {
            Some(Arc::new(WebhookDispatcher::new(config.webhooks.clone())))
        };

        Ok(Some(Self {
            project_root,
            store,
            session,
            config,
            signing_key,
            metrics: None,
            webhooks,
        }))
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn trace_id(&self) -> Option<String> {
        self.session.trace_id.as_ref().map(|t| t.as_str().to_owned())
    }

    fn logger(&self) -> Result<AuditLogger, HookError> {
        let mut logger = AuditLogger::new(self.store.clone(), self.session.id.clone())
            .with_trace_id(self.trace_id())
            .with_signing_key(self.signing_key);
        if let Some(metrics) = &self.metrics {
            logger = logger.with_metrics(metrics.clone());
        }
        if let Some(webhooks) = &self.webhooks {
            logger = logger.with_webhooks(webhooks.clone());
        }
        logger.start()?;
        Ok(logger)
    }

    fn state_manager(&self) -> StateManager {
        StateManager::new(self.store.clone())
    }

    fn enforcer(&self) -> Result<BoundaryEnforcer, HookError> {
        BoundaryEnforcer::new(
            self.store.clone(),
            self.session.id.clone(),
            &self.project_root,
            &self.config.boundaries,
        )
        .map_err(HookError::from)
    }

    /// Resolve which agent made this tool call: external-session lookup,
    /// then newest-unassigned correlation, then the implicit primary.
    fn identify_agent(&self, payload: &HookPayload) -> Result<Agent, HookError> {
        let manager = self.state_manager();

        if let Some(external) = payload.external_session_id() {
            if let Some(agent) = manager.get_agent_by_external_session_id(external)? {
                return Ok(agent);
            }
            if let Some(agent) = manager
                .assign_external_session_to_newest_unassigned(&self.session.id, external)?
            {
                return Ok(agent);
            }
        }

        if let Some(agent) = manager.get_agent_by_name(&self.session.id, PRIMARY_AGENT)? {
            return Ok(agent);
        }
        manager
            .register_agent(RegisterAgentParams::new(
                self.session.id.clone(),
                PRIMARY_AGENT,
            ))
            .map_err(HookError::from)
    }

    /// Handle a PostToolUse hook invocation.
    #[instrument(skip(self, payload))]
    pub fn post_tool_use(&self, payload: &HookPayload) -> Result<PipelineOutcome, HookError> {
        let Some(tool_name) = payload.tool_name() else {
            return Ok(PipelineOutcome::noop("payload has no tool_name"));
        };
        if INTERNAL_TOOLS.contains(&tool_name) {
            return Ok(PipelineOutcome::noop(format!("internal tool {tool_name}")));
        }

        let span = info_span!("tool_call", tool = tool_name, session_id = %self.session.id);
        let _entered = span.enter();

        let manager = self.state_manager();
        let enforcer = self.enforcer()?;
        let logger = self.logger()?;
        let agent = self.identify_agent(payload)?;

        // Resource accounting: warn exactly once, on the call that first
        // crosses the limit.
        let new_count = manager.increment_tool_call_count(&agent.id)?;
        if let Some(boundary) = enforcer.get_boundary_for_agent(&agent.name) {
            if let Some(limit) = boundary.max_tool_calls_per_session {
                if new_count == i64::try_from(limit).unwrap_or(i64::MAX).saturating_add(1) {
                    let _ = logger.log(
                        LogParams::new(
                            EventType::BoundaryViolation,
                            format!(
                                "Tool call limit exceeded ({new_count}/{limit}) for agent {}",
                                agent.name
                            ),
                        )
                        .agent(agent.id.clone())
                        .severity(Severity::Warning),
                    )?;
                }
            }
        }

        let affected = files::files_affected(payload.tool_input());
        let action = build_action(tool_name, payload.tool_input(), &affected);

        // Strict-mode enforcement for write-capable tools.
        let mut violation_flagged = false;
        if WRITE_LIKE_TOOLS.contains(&tool_name)
            && enforcer.enforcement_for_agent(&agent.name) == Enforcement::Strict
        {
            for file in &affected {
                let decision = enforcer.check_path_allowed(file, &agent.name);
                if decision.allowed {
                    continue;
                }
                violation_flagged = true;
                let reason = decision.reason.unwrap_or_default();
                let absolute = self.absolute(file);
                let outcome = revert::revert_file(&absolute, &self.project_root);

                let enforcement_action = if outcome.reverted {
                    EnforcementAction::Reverted
                } else {
                    EnforcementAction::RevertFailed
                };
                let mut details = serde_json::Map::new();
                let _ = details.insert("reason".to_owned(), serde_json::json!(reason));
                if let Some(content) = &outcome.original_content {
                    let _ = details.insert(
                        "original_content".to_owned(),
                        serde_json::json!(truncate_chars(content, MAX_ORIGINAL_CONTENT_CHARS)),
                    );
                }
                let _ = enforcer.record_violation(
                    file,
                    Some(agent.id.clone()),
                    BoundaryEnforcer::violation_type_for_reason(&reason),
                    enforcement_action,
                    Some(details),
                )?;

                let _ = logger.log(
                    LogParams::new(
                        EventType::BoundaryViolation,
                        format!("Boundary violation: {file} — {reason}"),
                    )
                    .agent(agent.id.clone())
                    .files(vec![file.clone()])
                    .severity(Severity::Critical),
                )?;
            }
        }

        let event_severity = severity::classify(&action, &affected, violation_flagged);

        // Duration: into details and the seconds histogram.
        let duration_ms = payload.duration_ms();
        if let (Some(metrics), Some(ms)) = (&self.metrics, duration_ms) {
            metrics.histogram_observe(
                TOOL_DURATION_SECONDS,
                &[("tool", tool_name)],
                ms as f64 / 1000.0,
            );
        }

        let mut details = serde_json::Map::new();
        let _ = details.insert("tool_name".to_owned(), serde_json::json!(tool_name));
        if let Some(tool_use_id) = payload.tool_use_id() {
            let _ = details.insert("tool_use_id".to_owned(), serde_json::json!(tool_use_id));
        }
        if let Some(input) = payload.tool_input() {
            let _ = details.insert("tool_input".to_owned(), bounded_value(input));
        }
        if let Some(ms) = duration_ms {
            let _ = details.insert("duration_ms".to_owned(), serde_json::json!(ms));
        }

        let mut params = LogParams::new(EventType::ToolUse, action)
            .agent(agent.id.clone())
            .details(details)
            .severity(event_severity);
        if !affected.is_empty() {
            params = params.files(affected.clone());
        }
        let event = logger.log(params)?;

        if WRITE_LIKE_TOOLS.contains(&tool_name) {
            self.annotate_sensitive_files(&logger, &agent, &affected)?;
            self.detect_dependency_changes(&logger, &agent, &affected)?;
        }

        Ok(PipelineOutcome::Completed(Box::new(event)))
    }

    /// One `gate_triggered` event per review rule with matching files.
    fn annotate_sensitive_files(
        &self,
        logger: &AuditLogger,
        agent: &Agent,
        affected: &[String],
    ) -> Result<(), HookError> {
        for rule in &self.config.review_rules {
            let matched = self.match_rule(rule, affected)?;
            if matched.is_empty() {
                continue;
            }
            let _ = logger.log(
                LogParams::new(
                    EventType::GateTriggered,
                    format!("Review rule '{}' matched: {}", rule.name, matched.join(", ")),
                )
                .agent(agent.id.clone())
                .files(matched)
                .gate(rule.id.clone())
                .severity(Severity::Warning),
            )?;
        }
        Ok(())
    }

    fn match_rule(
        &self,
        rule: &ReviewRuleConfig,
        affected: &[String],
    ) -> Result<Vec<String>, HookError> {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in &rule.file_patterns {
            let glob = globset::GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(k6s_engine::EngineError::from)?;
            let _ = builder.add(glob);
        }
        let set = builder.build().map_err(k6s_engine::EngineError::from)?;

        Ok(affected
            .iter()
            .filter(|file| {
                self.relative(file)
                    .map(|rel| set.is_match(&rel))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    /// One dependency event per changed `package.json` entry.
    fn detect_dependency_changes(
        &self,
        logger: &AuditLogger,
        agent: &Agent,
        affected: &[String],
    ) -> Result<(), HookError> {
        for file in affected {
            let Some(relative) = self.relative(file) else {
                continue;
            };
            if Path::new(&relative).file_name().and_then(|n| n.to_str()) != Some("package.json") {
                continue;
            }
            if !revert::in_repository(&self.project_root) {
                continue;
            }
            let Ok(current) = std::fs::read_to_string(self.project_root.join(&relative)) else {
                continue;
            };
            let previous = revert::committed_content(&self.project_root, Path::new(&relative));

            for change in deps::diff_package_json(previous.as_deref(), &current) {
                let mut details = serde_json::Map::new();
                let _ = details.insert("name".to_owned(), serde_json::json!(change.name));
                let _ = details.insert("section".to_owned(), serde_json::json!(change.section));
                if let Some(previous) = &change.previous {
                    let _ = details.insert("previous".to_owned(), serde_json::json!(previous));
                }
                if let Some(current) = &change.current {
                    let _ = details.insert("current".to_owned(), serde_json::json!(current));
                }
                let _ = logger.log(
                    LogParams::new(change.event_type, change.action())
                        .agent(agent.id.clone())
                        .details(details)
                        .files(vec![file.clone()])
                        .severity(Severity::Warning),
                )?;
            }
        }
        Ok(())
    }

    /// Handle a SubagentStart hook: register the agent and log the spawn.
    #[instrument(skip(self, payload))]
    pub fn subagent_start(&self, payload: &HookPayload) -> Result<PipelineOutcome, HookError> {
        let manager = self.state_manager();
        let logger = self.logger()?;

        let name = payload
            .tool_input()
            .and_then(|input| {
                ["subagent_type", "name", "description"]
                    .iter()
                    .find_map(|k| input.get(*k).and_then(serde_json::Value::as_str))
            })
            .unwrap_or("subagent");

        let agent = manager.register_agent(RegisterAgentParams::new(
            self.session.id.clone(),
            name,
        ))?;

        let mut details = serde_json::Map::new();
        let _ = details.insert("name".to_owned(), serde_json::json!(name));
        if let Some(external) = payload.external_session_id() {
            let _ = details.insert("external_session_id".to_owned(), serde_json::json!(external));
        }
        let event = logger.log(
            LogParams::new(EventType::AgentSpawn, format!("agent spawned: {name}"))
                .agent(agent.id)
                .details(details),
        )?;
        Ok(PipelineOutcome::Completed(Box::new(event)))
    }

    /// Handle a SubagentStop hook: mark the agent completed and release
    /// its locks.
    #[instrument(skip(self, payload))]
    pub fn subagent_stop(&self, payload: &HookPayload) -> Result<PipelineOutcome, HookError> {
        let manager = self.state_manager();
        let logger = self.logger()?;

        let agent = match payload.external_session_id() {
            Some(external) => manager.get_agent_by_external_session_id(external)?,
            None => None,
        };

        let Some(agent) = agent else {
            let event = logger.log(LogParams::new(
                EventType::AgentComplete,
                "subagent completed (unidentified)",
            ))?;
            return Ok(PipelineOutcome::Completed(Box::new(event)));
        };

        manager.mark_agent_state(&agent.id, AgentState::Completed)?;
        let locks = FileLockManager::new(self.store.clone(), self.session.id.clone());
        let released = locks.release_all_for_agent(&agent.id)?;

        let mut details = serde_json::Map::new();
        let _ = details.insert("locks_released".to_owned(), serde_json::json!(released));
        let event = logger.log(
            LogParams::new(
                EventType::AgentComplete,
                format!("agent completed: {}", agent.name),
            )
            .agent(agent.id)
            .details(details),
        )?;
        Ok(PipelineOutcome::Completed(Box::new(event)))
    }

    /// Handle a Stop hook: close the session and clear the liveness flag.
    #[instrument(skip(self))]
    pub fn session_stop(&self) -> Result<PipelineOutcome, HookError> {
        let logger = self.logger()?;
        let event = logger.log(LogParams::new(
            EventType::SessionComplete,
            "agent runtime session ended",
        ))?;

        self.state_manager()
            .mark_session_completed(&self.session.id, None)?;
        SessionFile::new(self.project_root.join(".khoregos")).remove();

        Ok(PipelineOutcome::Completed(Box::new(event)))
    }

    fn absolute(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.project_root.join(candidate)
        }
    }

    /// POSIX-relative form of a path, or `None` when it escapes the root.
    fn relative(&self, path: &str) -> Option<String> {
        let absolute = self.absolute(path);
        let relative = absolute.strip_prefix(&self.project_root).ok()?;
        Some(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

/// Readable one-line action summary for the primary event.
fn build_action(
    tool_name: &str,
    tool_input: Option<&serde_json::Value>,
    affected: &[String],
) -> String {
    if tool_name == "Bash" {
        let command = tool_input
            .and_then(|input| input.get("command"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        return format!("tool_use: bash — {}", truncate_chars(command, 120));
    }
    if matches!(tool_name, "Write" | "Edit" | "MultiEdit") {
        if let Some(first) = affected.first() {
            return format!("tool_use: {} — {first}", tool_name.to_lowercase());
        }
    }
    format!("tool_use: {tool_name}")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...[truncated]");
        out
    }
}

/// Tool input bounded for storage: small values verbatim, large ones as
/// a truncated string.
fn bounded_value(value: &serde_json::Value) -> serde_json::Value {
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX_INPUT_DETAIL_CHARS {
        value.clone()
    } else {
        serde_json::json!(truncate_chars(&rendered, MAX_INPUT_DETAIL_CHARS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_for_bash_includes_command() {
        let input = serde_json::json!({"command": "rm -rf build"});
        let action = build_action("Bash", Some(&input), &[]);
        assert_eq!(action, "tool_use: bash — rm -rf build");
    }

    #[test]
    fn action_for_bash_truncates_long_commands() {
        let long = "x".repeat(200);
        let input = serde_json::json!({ "command": long });
        let action = build_action("Bash", Some(&input), &[]);
        assert!(action.len() < 200);
        assert!(action.ends_with("...[truncated]"));
    }

    #[test]
    fn action_for_write_names_first_file() {
        let action = build_action("Write", None, &["src/main.rs".to_owned()]);
        assert_eq!(action, "tool_use: write — src/main.rs");
    }

    #[test]
    fn action_fallback_is_tool_name() {
        assert_eq!(build_action("Read", None, &[]), "tool_use: Read");
    }

    #[test]
    fn bounded_value_keeps_small_inputs() {
        let input = serde_json::json!({"path": "x.txt"});
        assert_eq!(bounded_value(&input), input);
    }

    #[test]
    fn bounded_value_truncates_large_inputs() {
        let input = serde_json::json!({"content": "y".repeat(5000)});
        let bounded = bounded_value(&input);
        assert!(bounded.is_string());
        assert!(bounded.as_str().unwrap().ends_with("...[truncated]"));
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        let truncated = truncate_chars(&"é".repeat(20), 5);
        assert!(truncated.starts_with(&"é".repeat(5)));
        assert!(truncated.ends_with("...[truncated]"));
    }
}
