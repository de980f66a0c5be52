//! Project-root discovery for hook processes.
//!
//! Hooks run wherever the host runtime put them: sometimes the project
//! root, sometimes a subdirectory, occasionally one level above. The
//! governed project is the first directory with a live session flag
//! (`.khoregos/daemon.state`): the working directory itself, then its
//! ancestors, then its immediate children.

use std::path::{Path, PathBuf};

fn has_live_session(dir: &Path) -> bool {
    dir.join(".khoregos").join("daemon.state").exists()
}

/// Find the governed project root for a hook invocation.
#[must_use]
pub fn resolve_project_root(cwd: &Path) -> Option<PathBuf> {
    if has_live_session(cwd) {
        return Some(cwd.to_path_buf());
    }

    for ancestor in cwd.ancestors().skip(1) {
        if has_live_session(ancestor) {
            return Some(ancestor.to_path_buf());
        }
    }

    let entries = std::fs::read_dir(cwd).ok()?;
    let mut children: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    children.sort();
    children.into_iter().find(|child| has_live_session(child))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark_active(dir: &Path) {
        let khoregos = dir.join(".khoregos");
        std::fs::create_dir_all(&khoregos).unwrap();
        std::fs::write(khoregos.join("daemon.state"), r#"{"session_id": "s1"}"#).unwrap();
    }

    #[test]
    fn finds_cwd_itself() {
        let dir = tempfile::tempdir().unwrap();
        mark_active(dir.path());
        assert_eq!(resolve_project_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn finds_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        mark_active(dir.path());
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(resolve_project_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn finds_immediate_child() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("governed");
        std::fs::create_dir_all(&project).unwrap();
        mark_active(&project);
        assert_eq!(resolve_project_root(dir.path()).unwrap(), project);
    }

    #[test]
    fn cwd_wins_over_child() {
        let dir = tempfile::tempdir().unwrap();
        mark_active(dir.path());
        let child = dir.path().join("also-governed");
        std::fs::create_dir_all(&child).unwrap();
        mark_active(&child);
        assert_eq!(resolve_project_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn none_without_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plain")).unwrap();
        assert!(resolve_project_root(dir.path()).is_none());
    }

    #[test]
    fn khoregos_dir_without_state_file_is_not_live() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".khoregos")).unwrap();
        assert!(resolve_project_root(dir.path()).is_none());
    }
}
