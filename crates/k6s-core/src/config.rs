//! Governance configuration records.
//!
//! The surrounding CLI parses `k6s.yaml` and persists a JSON snapshot on
//! the session row (webhook secrets redacted, `$ENV` references kept).
//! The core, including every hook subprocess, consumes that snapshot
//! through these types and never touches YAML.

use serde::{Deserialize, Serialize};

/// How boundary violations are enforced for an agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Violations are logged; the write persists.
    #[default]
    Advisory,
    /// Violations revert the write from the version-control snapshot.
    Strict,
}

impl Enforcement {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::Strict => "strict",
        }
    }
}

/// Path boundary for agents whose name matches `pattern`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Agent name glob (e.g. `frontend-*`, `*`).
    pub pattern: String,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    #[serde(default)]
    pub enforcement: Enforcement,
    /// Hard ceiling on tool calls per session; the call that first exceeds
    /// it is logged once as a warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls_per_session: Option<u64>,
}

/// A sensitive-file review rule. Matching writes produce a
/// `gate_triggered` audit event (shown as `sensitive_needs_review`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewRuleConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

/// Outbound webhook target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Event types to deliver; empty means all.
    #[serde(default)]
    pub events: Vec<String>,
    /// Signing secret. A `$NAME` value resolves from the environment at
    /// delivery time; literal secrets are redacted from session snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl WebhookConfig {
    /// Snapshot form with literal secrets redacted. `$ENV` references are
    /// kept; they carry no secret material themselves.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let secret = match &self.secret {
            Some(s) if s.starts_with('$') => Some(s.clone()),
            Some(_) => Some("[redacted]".to_owned()),
            None => None,
        };
        Self {
            url: self.url.clone(),
            events: self.events.clone(),
            secret,
        }
    }
}

/// Out-of-tree plugin entry. `module` keys into the compiled-in plugin
/// registry of the lifecycle process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    pub module: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Retention windows for pruning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_context_retention_days")]
    pub context_retention_days: u32,
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,
}

fn default_context_retention_days() -> u32 {
    90
}

fn default_audit_retention_days() -> u32 {
    365
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            context_retention_days: default_context_retention_days(),
            audit_retention_days: default_audit_retention_days(),
        }
    }
}

/// The governance settings a hook process needs, as stored in a session's
/// `config_snapshot`. Unknown fields from richer CLI-side configuration
/// are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub boundaries: Vec<BoundaryConfig>,
    #[serde(default)]
    pub review_rules: Vec<ReviewRuleConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl GovernanceConfig {
    /// Parse a session `config_snapshot`. Malformed JSON yields the
    /// default (ungoverned) configuration rather than failing the hook.
    #[must_use]
    pub fn from_snapshot(snapshot: &str) -> Self {
        serde_json::from_str(snapshot).unwrap_or_default()
    }

    /// Snapshot form with webhook secrets redacted.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            webhooks: self.webhooks.iter().map(WebhookConfig::redacted).collect(),
            ..self.clone()
        }
    }

    /// The default forbidden-file boundary applied to fresh projects.
    #[must_use]
    pub fn default_boundaries() -> Vec<BoundaryConfig> {
        vec![BoundaryConfig {
            pattern: "*".to_owned(),
            allowed_paths: Vec::new(),
            forbidden_paths: vec![
                ".env*".to_owned(),
                "**/*.pem".to_owned(),
                "**/*.key".to_owned(),
            ],
            enforcement: Enforcement::Advisory,
            max_tool_calls_per_session: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let config = GovernanceConfig {
            boundaries: vec![BoundaryConfig {
                pattern: "frontend-*".to_owned(),
                allowed_paths: vec!["src/**".to_owned()],
                forbidden_paths: vec![".env*".to_owned()],
                enforcement: Enforcement::Strict,
                max_tool_calls_per_session: Some(100),
            }],
            review_rules: vec![ReviewRuleConfig {
                id: "security-files".to_owned(),
                name: "Security File Changes".to_owned(),
                file_patterns: vec!["**/auth/**".to_owned()],
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back = GovernanceConfig::from_snapshot(&json);
        assert_eq!(back, config);
    }

    #[test]
    fn malformed_snapshot_yields_default() {
        let config = GovernanceConfig::from_snapshot("{not json");
        assert!(config.boundaries.is_empty());
        assert!(config.webhooks.is_empty());
    }

    #[test]
    fn unknown_fields_ignored() {
        let config = GovernanceConfig::from_snapshot(
            r#"{"project": {"name": "demo"}, "boundaries": [{"pattern": "*"}]}"#,
        );
        assert_eq!(config.boundaries.len(), 1);
        assert_eq!(config.boundaries[0].enforcement, Enforcement::Advisory);
    }

    #[test]
    fn literal_secret_is_redacted() {
        let hook = WebhookConfig {
            url: "https://ops.example/hook".to_owned(),
            events: vec![],
            secret: Some("s3cret".to_owned()),
        };
        assert_eq!(hook.redacted().secret.as_deref(), Some("[redacted]"));
    }

    #[test]
    fn env_reference_secret_survives_redaction() {
        let hook = WebhookConfig {
            url: "https://ops.example/hook".to_owned(),
            events: vec![],
            secret: Some("$K6S_WEBHOOK_SECRET".to_owned()),
        };
        assert_eq!(
            hook.redacted().secret.as_deref(),
            Some("$K6S_WEBHOOK_SECRET")
        );
    }

    #[test]
    fn default_boundaries_forbid_sensitive_files() {
        let boundaries = GovernanceConfig::default_boundaries();
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].pattern, "*");
        assert!(boundaries[0]
            .forbidden_paths
            .iter()
            .any(|p| p == ".env*"));
        assert_eq!(boundaries[0].enforcement, Enforcement::Advisory);
    }

    #[test]
    fn retention_defaults() {
        let retention = RetentionConfig::default();
        assert_eq!(retention.context_retention_days, 90);
        assert_eq!(retention.audit_retention_days, 365);
    }
}
