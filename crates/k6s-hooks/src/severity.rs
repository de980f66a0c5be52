//! Severity classification for the primary tool-use event.
//!
//! Critical: security-sensitive files. Warning: dependency manifests and
//! dangerous shell verbs. Everything else is informational.

use std::sync::OnceLock;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;

use k6s_core::events::Severity;

const CRITICAL_PATTERNS: &[&str] = &[
    ".env*",
    "**/auth/**",
    "**/security/**",
    "**/*.pem",
    "**/*.key",
];

const DEPENDENCY_MANIFEST_PATTERNS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "requirements.txt",
    "go.mod",
    "go.sum",
    "Cargo.toml",
    "Cargo.lock",
    "poetry.lock",
    "**/pom.xml",
];

fn build_globset(patterns: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .expect("static pattern compiles");
        let _ = builder.add(glob);
    }
    builder.build().expect("static globset builds")
}

fn critical_set() -> &'static GlobSet {
    static SET: OnceLock<GlobSet> = OnceLock::new();
    SET.get_or_init(|| build_globset(CRITICAL_PATTERNS))
}

fn manifest_set() -> &'static GlobSet {
    static SET: OnceLock<GlobSet> = OnceLock::new();
    SET.get_or_init(|| build_globset(DEPENDENCY_MANIFEST_PATTERNS))
}

fn dangerous_shell() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(rm|kill|chmod|chown|curl|wget)\b").expect("static regex compiles")
    })
}

/// Does any affected file hit the critical pattern set?
#[must_use]
pub fn touches_critical_file(files: &[String]) -> bool {
    files.iter().any(|f| critical_set().is_match(f))
}

/// Does any affected file look like a dependency manifest?
#[must_use]
pub fn touches_dependency_manifest(files: &[String]) -> bool {
    files.iter().any(|f| manifest_set().is_match(f))
}

/// Classify the primary tool-use event.
///
/// `violation_flagged` forces critical; set when this call tripped a
/// boundary.
#[must_use]
pub fn classify(action: &str, files: &[String], violation_flagged: bool) -> Severity {
    if violation_flagged || touches_critical_file(files) {
        return Severity::Critical;
    }
    if touches_dependency_manifest(files) || dangerous_shell().is_match(action) {
        return Severity::Warning;
    }
    Severity::Info
}
