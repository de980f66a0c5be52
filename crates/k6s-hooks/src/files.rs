//! Files-affected derivation from tool inputs.
//!
//! Structured tools name their target directly (`file_path`, `path`,
//! `filename`). Shell commands only have a command string, so path-like
//! tokens are extracted with a deliberately conservative heuristic:
//! anything that could be a URL, JSON fragment, MIME type, header, flag,
//! device node, command name, or code invocation is rejected. Missing a
//! path is acceptable; inventing one is not.

use std::sync::OnceLock;

use regex::Regex;

/// Cap on derived paths per tool call.
pub const MAX_FILES: usize = 10;

/// Commands whose bare names must never be mistaken for file paths.
const KNOWN_COMMANDS: &[&str] = &[
    "awk", "bash", "cargo", "cat", "cd", "chmod", "chown", "cp", "curl", "docker", "echo",
    "find", "gcc", "git", "go", "grep", "head", "kill", "ls", "make", "mkdir", "mv", "node",
    "npm", "npx", "pip", "pnpm", "python", "python3", "rg", "rm", "rustc", "sed", "sh", "sort",
    "tail", "tar", "tee", "touch", "uniq", "wget", "xargs", "yarn",
];

/// Derive the affected files for a tool call.
#[must_use]
pub fn files_affected(tool_input: Option<&serde_json::Value>) -> Vec<String> {
    let Some(serde_json::Value::Object(input)) = tool_input else {
        return Vec::new();
    };

    let mut files = Vec::new();
    for key in ["file_path", "path", "filename"] {
        if let Some(serde_json::Value::String(path)) = input.get(key) {
            if !path.is_empty() && !files.contains(path) {
                files.push(path.clone());
            }
        }
    }

    if let Some(serde_json::Value::String(command)) = input.get("command") {
        for path in extract_paths_from_command(command) {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }

    files.truncate(MAX_FILES);
    files
}

/// Extract path-like tokens from a shell command, conservatively.
#[must_use]
pub fn extract_paths_from_command(command: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for raw in command.split_whitespace() {
        let token = raw.trim_matches(|c: char| {
            matches!(c, '"' | '\'' | '`' | ';' | ',' | ')' | '(' | '<' | '>' | '|' | '&')
        });
        if token.is_empty() {
            continue;
        }
        if is_path_like(token) && !paths.contains(&token.to_owned()) {
            paths.push(token.to_owned());
        }
        if paths.len() >= MAX_FILES {
            break;
        }
    }
    paths
}

fn is_path_like(token: &str) -> bool {
    // Must look like a path at all: contain a separator or be dot-prefixed.
    if !token.contains('/') && !token.starts_with('.') {
        return false;
    }
    // URLs.
    if token.contains("://") {
        return false;
    }
    // JSON fragments.
    if token.contains('{') || token.contains('}') || token.contains('[') || token.contains(']') {
        return false;
    }
    // MIME types (application/json, text/html, …).
    if mime_pattern().is_match(token) {
        return false;
    }
    // HTTP header fragments (Content-Type:, Authorization:).
    if header_pattern().is_match(token) {
        return false;
    }
    // Flags.
    if token.starts_with('-') {
        return false;
    }
    // Device nodes.
    if token.starts_with("/dev/") {
        return false;
    }
    // Bare command names (also the dotted `./configure` still passes).
    if KNOWN_COMMANDS.contains(&token) {
        return false;
    }
    // Code invocations.
    if token.contains('(') || token.contains("::") || token.contains('$') {
        return false;
    }
    // Lone dots and separators.
    if token.chars().all(|c| c == '.' || c == '/') {
        return false;
    }
    true
}

fn mime_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(application|audio|font|image|message|model|multipart|text|video)/[\w.+-]+$")
            .expect("static regex compiles")
    })
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z-]*:").expect("static regex compiles")
    })
}
