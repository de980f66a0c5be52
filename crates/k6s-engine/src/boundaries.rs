//! Glob-based path boundaries per agent.
//!
//! Decision order for a path: resolve against the project root, deny
//! anything that escapes it, then forbidden patterns (first match wins),
//! then the allow-list when one is configured. Patterns are compiled once
//! at construction so a bad glob fails fast instead of mid-enforcement.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;
use tracing::instrument;

use k6s_core::config::{BoundaryConfig, Enforcement};
use k6s_core::ids::{AgentId, SessionId};
use k6s_store::models::{BoundaryViolation, EnforcementAction, ViolationType};
use k6s_store::{SqlValue, Store};

use crate::errors::EngineError;

/// Outcome of a path check. `reason` is set exactly when denied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PathDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Summary of an agent's effective boundary, for helper-surface replies.
#[derive(Clone, Debug, Serialize)]
pub struct BoundarySummary {
    pub agent: String,
    pub has_boundary: bool,
    pub allowed_paths: Vec<String>,
    pub forbidden_paths: Vec<String>,
    pub enforcement: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_calls_per_session: Option<u64>,
}

struct CompiledBoundary {
    config: BoundaryConfig,
    name_glob: GlobMatcher,
    allowed: Vec<GlobMatcher>,
    forbidden: Vec<(String, GlobMatcher)>,
}

/// Decides whether an agent may touch a path and records violations.
pub struct BoundaryEnforcer {
    store: Store,
    session_id: SessionId,
    project_root: PathBuf,
    boundaries: Vec<CompiledBoundary>,
}

impl BoundaryEnforcer {
    /// Compile all boundary patterns. A malformed glob is a construction
    /// error, never a silent non-match.
    pub fn new(
        store: Store,
        session_id: SessionId,
        project_root: impl Into<PathBuf>,
        boundaries: &[BoundaryConfig],
    ) -> Result<Self, EngineError> {
        let compiled = boundaries
            .iter()
            .map(|config| {
                Ok(CompiledBoundary {
                    config: config.clone(),
                    name_glob: name_glob(&config.pattern)?,
                    allowed: config
                        .allowed_paths
                        .iter()
                        .map(|p| path_glob(p))
                        .collect::<Result<_, _>>()?,
                    forbidden: config
                        .forbidden_paths
                        .iter()
                        .map(|p| Ok((p.clone(), path_glob(p)?)))
                        .collect::<Result<_, EngineError>>()?,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(Self {
            store,
            session_id,
            project_root: project_root.into(),
            boundaries: compiled,
        })
    }

    /// The boundary matching an agent name: first declaration-order glob
    /// match, else the `"*"` wildcard entry if one exists.
    #[must_use]
    pub fn get_boundary_for_agent(&self, agent_name: &str) -> Option<&BoundaryConfig> {
        self.boundaries
            .iter()
            .find(|b| b.name_glob.is_match(agent_name))
            .or_else(|| self.boundaries.iter().find(|b| b.config.pattern == "*"))
            .map(|b| &b.config)
    }

    fn compiled_for_agent(&self, agent_name: &str) -> Option<&CompiledBoundary> {
        self.boundaries
            .iter()
            .find(|b| b.name_glob.is_match(agent_name))
            .or_else(|| self.boundaries.iter().find(|b| b.config.pattern == "*"))
    }

    /// Decide whether `path` is inside the agent's boundary.
    #[instrument(skip(self), fields(agent = agent_name))]
    pub fn check_path_allowed(&self, path: &str, agent_name: &str) -> PathDecision {
        let root = resolve_existing(&self.project_root);

        let candidate = Path::new(path);
        let absolute = if candidate.is_absolute() {
            resolve_existing(candidate)
        } else {
            resolve_existing(&root.join(candidate))
        };

        let relative = match absolute.strip_prefix(&root) {
            Ok(rel) if !rel.as_os_str().is_empty() => posix(rel),
            Ok(_) => String::new(),
            Err(_) => {
                return PathDecision::deny(format!("Path {path} is outside project root"));
            }
        };

        let Some(boundary) = self.compiled_for_agent(agent_name) else {
            return PathDecision::deny(format!("No boundary configured for {agent_name}"));
        };

        // Forbidden patterns take precedence.
        for (pattern, matcher) in &boundary.forbidden {
            if matcher.is_match(&relative) {
                return PathDecision::deny(format!("Path matches forbidden pattern: {pattern}"));
            }
        }

        // A non-empty allow-list requires at least one match.
        if !boundary.allowed.is_empty() {
            if boundary.allowed.iter().any(|m| m.is_match(&relative)) {
                return PathDecision::allow();
            }
            return PathDecision::deny(format!(
                "Path does not match any allowed patterns for {agent_name}"
            ));
        }

        PathDecision::allow()
    }

    /// Classify a deny reason into the stored violation type.
    #[must_use]
    pub fn violation_type_for_reason(reason: &str) -> ViolationType {
        if reason.contains("forbidden pattern") {
            ViolationType::ForbiddenPath
        } else {
            ViolationType::OutsideAllowed
        }
    }

    /// Persist a violation row.
    pub fn record_violation(
        &self,
        file_path: &str,
        agent_id: Option<AgentId>,
        violation_type: ViolationType,
        enforcement_action: EnforcementAction,
        details: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<BoundaryViolation, EngineError> {
        let mut violation = BoundaryViolation::new(
            self.session_id.clone(),
            file_path,
            violation_type,
            enforcement_action,
        );
        violation.agent_id = agent_id;
        violation.details = details;

        let _ = self
            .store
            .insert("boundary_violations", &violation.to_row()?)?;
        Ok(violation)
    }

    /// Violations for this session, newest first.
    pub fn get_violations(
        &self,
        agent_id: Option<&AgentId>,
        limit: u32,
    ) -> Result<Vec<BoundaryViolation>, EngineError> {
        let rows = match agent_id {
            Some(agent_id) => self.store.fetch_all(
                "SELECT * FROM boundary_violations
                 WHERE session_id = ? AND agent_id = ?
                 ORDER BY timestamp DESC LIMIT ?",
                &[
                    SqlValue::Text(self.session_id.as_str().to_owned()),
                    SqlValue::Text(agent_id.as_str().to_owned()),
                    SqlValue::Integer(i64::from(limit)),
                ],
            )?,
            None => self.store.fetch_all(
                "SELECT * FROM boundary_violations
                 WHERE session_id = ?
                 ORDER BY timestamp DESC LIMIT ?",
                &[
                    SqlValue::Text(self.session_id.as_str().to_owned()),
                    SqlValue::Integer(i64::from(limit)),
                ],
            )?,
        };
        rows.iter()
            .map(|row| BoundaryViolation::from_row(row).map_err(EngineError::from))
            .collect()
    }

    /// Boundary summary for an agent. No matching boundary reads as
    /// deny-everything.
    #[must_use]
    pub fn get_agent_boundaries_summary(&self, agent_name: &str) -> BoundarySummary {
        match self.get_boundary_for_agent(agent_name) {
            Some(boundary) => BoundarySummary {
                agent: agent_name.to_owned(),
                has_boundary: true,
                allowed_paths: boundary.allowed_paths.clone(),
                forbidden_paths: boundary.forbidden_paths.clone(),
                enforcement: boundary.enforcement.as_str().to_owned(),
                max_tool_calls_per_session: boundary.max_tool_calls_per_session,
            },
            None => BoundarySummary {
                agent: agent_name.to_owned(),
                has_boundary: false,
                allowed_paths: Vec::new(),
                forbidden_paths: Vec::new(),
                enforcement: "deny".to_owned(),
                max_tool_calls_per_session: None,
            },
        }
    }

    /// The enforcement mode for an agent, advisory when unbounded.
    #[must_use]
    pub fn enforcement_for_agent(&self, agent_name: &str) -> Enforcement {
        self.get_boundary_for_agent(agent_name)
            .map(|b| b.enforcement)
            .unwrap_or_default()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// Agent-name glob: separators carry no meaning in names.
fn name_glob(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()?
        .compile_matcher())
}

/// Path glob: `*` stays within one segment, `**` spans segments, leading
/// dots match like any other character.
fn path_glob(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

/// Canonicalize when the path exists, fall back to lexical resolution
/// otherwise (files being written may not exist yet).
fn resolve_existing(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| lexical_normalize(path))
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    let mut rooted = false;
    for component in path.components() {
        match component {
            Component::RootDir => {
                rooted = true;
                parts.clear();
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = parts.pop();
            }
            other => parts.push(other.as_os_str().to_owned()),
        }
    }
    let mut out = if rooted {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    for part in parts {
        out.push(part);
    }
    out
}

/// Render a relative path with POSIX separators.
fn posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(
        pattern: &str,
        allowed: &[&str],
        forbidden: &[&str],
        enforcement: Enforcement,
    ) -> BoundaryConfig {
        BoundaryConfig {
            pattern: pattern.to_owned(),
            allowed_paths: allowed.iter().map(|s| (*s).to_owned()).collect(),
            forbidden_paths: forbidden.iter().map(|s| (*s).to_owned()).collect(),
            enforcement,
            max_tool_calls_per_session: None,
        }
    }

    fn enforcer(root: &Path, boundaries: &[BoundaryConfig]) -> BoundaryEnforcer {
        BoundaryEnforcer::new(
            Store::in_memory().unwrap(),
            SessionId::from_raw("s1"),
            root,
            boundaries,
        )
        .unwrap()
    }


    #[test]
    fn forbidden_pattern_denies_with_exact_reason() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &["**"], &[".env*", "**/*.pem"], Enforcement::Advisory)],
        );

        let decision = enforcer.check_path_allowed(".env.local", "primary");
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Path matches forbidden pattern: .env*")
        );
    }

    #[test]
    fn nested_forbidden_matches_across_segments() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &[], &["**/*.pem"], Enforcement::Advisory)],
        );
        assert!(!enforcer.check_path_allowed("certs/server.pem", "primary").allowed);
        assert!(!enforcer.check_path_allowed("server.pem", "primary").allowed);
        assert!(enforcer.check_path_allowed("certs/server.txt", "primary").allowed);
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &["src/*.rs"], &[], Enforcement::Advisory)],
        );
        assert!(enforcer.check_path_allowed("src/main.rs", "primary").allowed);
        assert!(!enforcer.check_path_allowed("src/nested/deep.rs", "primary").allowed);
    }

    #[test]
    fn allow_list_required_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &["src/**"], &[], Enforcement::Advisory)],
        );

        assert!(enforcer.check_path_allowed("src/lib.rs", "primary").allowed);
        let decision = enforcer.check_path_allowed("docs/readme.md", "primary");
        assert!(!decision.allowed);
        assert!(decision
            .reason
            .unwrap()
            .contains("does not match any allowed patterns"));
    }

    #[test]
    fn empty_allow_list_permits_anything_not_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &[], &[".env*"], Enforcement::Advisory)],
        );
        assert!(enforcer.check_path_allowed("anything/goes.txt", "primary").allowed);
        assert!(!enforcer.check_path_allowed(".env", "primary").allowed);
    }

    #[test]
    fn path_outside_root_denied() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &["**"], &[], Enforcement::Advisory)],
        );

        let decision = enforcer.check_path_allowed("../outside.txt", "primary");
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("outside project root"));

        let decision = enforcer.check_path_allowed("/etc/passwd", "primary");
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("outside project root"));
    }

    #[test]
    fn absolute_path_inside_root_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &["src/**"], &[], Enforcement::Advisory)],
        );
        let absolute = dir.path().join("src/app.rs");
        assert!(enforcer
            .check_path_allowed(absolute.to_str().unwrap(), "primary")
            .allowed);
    }

    #[test]
    fn no_boundary_configured_denies() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(dir.path(), &[]);
        let decision = enforcer.check_path_allowed("src/main.rs", "primary");
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("No boundary configured"));
    }

    #[test]
    fn agent_pattern_matching_with_wildcard_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[
                boundary("frontend-*", &["web/**"], &[], Enforcement::Strict),
                boundary("*", &["**"], &[], Enforcement::Advisory),
            ],
        );

        let frontend = enforcer.get_boundary_for_agent("frontend-dev").unwrap();
        assert_eq!(frontend.pattern, "frontend-*");
        let fallback = enforcer.get_boundary_for_agent("backend-dev").unwrap();
        assert_eq!(fallback.pattern, "*");
        assert_eq!(
            enforcer.enforcement_for_agent("frontend-dev"),
            Enforcement::Strict
        );
    }

    #[test]
    fn check_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary("*", &["src/**"], &[".env*"], Enforcement::Advisory)],
        );
        for path in ["src/a.rs", ".env", "docs/x.md", "../escape"] {
            let first = enforcer.check_path_allowed(path, "primary");
            let second = enforcer.check_path_allowed(path, "primary");
            assert_eq!(first, second, "non-deterministic for {path}");
        }
    }

    #[test]
    fn bad_glob_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let result = BoundaryEnforcer::new(
            Store::in_memory().unwrap(),
            SessionId::from_raw("s1"),
            dir.path(),
            &[boundary("*", &["[unclosed"], &[], Enforcement::Advisory)],
        );
        assert!(matches!(result, Err(EngineError::Glob(_))));
    }

    #[test]
    fn record_and_list_violations() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::in_memory().unwrap();
        let session = k6s_store::models::Session::new("work");
        let _ = store.insert("sessions", &session.to_row().unwrap()).unwrap();
        let enforcer = BoundaryEnforcer::new(
            store,
            session.id.clone(),
            dir.path(),
            &[boundary("*", &[], &[".env*"], Enforcement::Advisory)],
        )
        .unwrap();

        let violation = enforcer
            .record_violation(
                ".env.local",
                Some(AgentId::from_raw("a1")),
                ViolationType::ForbiddenPath,
                EnforcementAction::Logged,
                None,
            )
            .unwrap();
        assert_eq!(violation.file_path, ".env.local");

        let listed = enforcer.get_violations(None, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], violation);

        let by_agent = enforcer
            .get_violations(Some(&AgentId::from_raw("a1")), 10)
            .unwrap();
        assert_eq!(by_agent.len(), 1);
        let other_agent = enforcer
            .get_violations(Some(&AgentId::from_raw("other")), 10)
            .unwrap();
        assert!(other_agent.is_empty());
    }

    #[test]
    fn summary_for_bounded_and_unbounded_agents() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(
            dir.path(),
            &[boundary(
                "frontend-*",
                &["web/**"],
                &[".env*"],
                Enforcement::Strict,
            )],
        );

        let bounded = enforcer.get_agent_boundaries_summary("frontend-dev");
        assert!(bounded.has_boundary);
        assert_eq!(bounded.enforcement, "strict");
        assert_eq!(bounded.allowed_paths, vec!["web/**"]);

        let unbounded = enforcer.get_agent_boundaries_summary("rogue");
        assert!(!unbounded.has_boundary);
        assert_eq!(unbounded.enforcement, "deny");
    }

    #[test]
    fn reason_classification() {
        assert_eq!(
            BoundaryEnforcer::violation_type_for_reason("Path matches forbidden pattern: .env*"),
            ViolationType::ForbiddenPath
        );
        assert_eq!(
            BoundaryEnforcer::violation_type_for_reason(
                "Path does not match any allowed patterns for primary"
            ),
            ViolationType::OutsideAllowed
        );
        assert_eq!(
            BoundaryEnforcer::violation_type_for_reason("Path x is outside project root"),
            ViolationType::OutsideAllowed
        );
    }

    #[test]
    fn lexical_normalize_resolves_dots() {
        assert_eq!(
            lexical_normalize(Path::new("/foo/bar/../baz")),
            PathBuf::from("/foo/baz")
        );
        assert_eq!(
            lexical_normalize(Path::new("/foo/./bar")),
            PathBuf::from("/foo/bar")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_root_resolves_consistently() {
        let dir = tempfile::tempdir().unwrap();
        let real_root = dir.path().join("real");
        std::fs::create_dir_all(real_root.join("src")).unwrap();
        std::fs::write(real_root.join("src/app.rs"), "fn main() {}\n").unwrap();

        let link_root = dir.path().join("link");
        std::os::unix::fs::symlink(&real_root, &link_root).unwrap();
        let enforcer = enforcer(
            &link_root,
            &[boundary("*", &["src/**"], &[], Enforcement::Advisory)],
        );
        // A path given through the symlink resolves into the canonical
        // root and stays inside the boundary.
        assert!(enforcer.check_path_allowed("src/app.rs", "primary").allowed);
    }
}
