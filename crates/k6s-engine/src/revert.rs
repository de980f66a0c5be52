//! Strict-mode post-hoc reconciliation via the version-control snapshot.
//!
//! The host runtime is not interceptable, so strict enforcement reverts
//! after the fact: tracked files are restored from `HEAD`, untracked
//! files are deleted. Failures are absorbed: a revert that cannot happen
//! is recorded as `revert_failed` by the caller, never raised.

use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

/// What a revert attempt did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevertOutcome {
    /// True when the working tree was restored (checkout or delete).
    pub reverted: bool,
    /// The violating content captured before the revert, if readable.
    pub original_content: Option<String>,
}

/// Revert one file to its last committed state.
///
/// Reads the current (violating) content first so the caller can store
/// it in the violation record. Tracked files get a per-file checkout of
/// `HEAD`; untracked files are deleted. Any failure returns the captured
/// content with `reverted: false`.
pub fn revert_file(absolute_path: &Path, project_root: &Path) -> RevertOutcome {
    let original_content = std::fs::read_to_string(absolute_path).ok();

    let Ok(relative) = absolute_path.strip_prefix(project_root) else {
        warn!(path = %absolute_path.display(), "revert target escapes project root");
        return RevertOutcome {
            reverted: false,
            original_content,
        };
    };

    if !in_repository(project_root) {
        warn!(root = %project_root.display(), "no version control, cannot revert");
        return RevertOutcome {
            reverted: false,
            original_content,
        };
    }

    if is_tracked(project_root, relative) {
        let restored = git(project_root)
            .args(["checkout", "HEAD", "--"])
            .arg(relative)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if restored {
            debug!(path = %relative.display(), "reverted to HEAD");
        } else {
            warn!(path = %relative.display(), "git checkout failed");
        }
        RevertOutcome {
            reverted: restored,
            original_content,
        }
    } else {
        match std::fs::remove_file(absolute_path) {
            Ok(()) => {
                debug!(path = %relative.display(), "untracked file deleted");
                RevertOutcome {
                    reverted: true,
                    original_content,
                }
            }
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "failed to delete untracked file");
                RevertOutcome {
                    reverted: false,
                    original_content,
                }
            }
        }
    }
}

/// The last committed contents of a file, or `None` when untracked or
/// there is no repository.
pub fn committed_content(project_root: &Path, relative: &Path) -> Option<String> {
    let spec = format!("HEAD:{}", posix(relative));
    let output = git(project_root).args(["show", &spec]).output().ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        None
    }
}

/// Whether the project root is inside a git work tree.
pub fn in_repository(project_root: &Path) -> bool {
    git(project_root)
        .args(["rev-parse", "--git-dir"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn is_tracked(project_root: &Path, relative: &Path) -> bool {
    git(project_root)
        .args(["ls-files", "--error-unmatch"])
        .arg(relative)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(project_root: &Path) -> Command {
    let mut cmd = Command::new("git");
    let _ = cmd.arg("-C").arg(project_root);
    let _ = cmd.stdout(std::process::Stdio::piped());
    let _ = cmd.stderr(std::process::Stdio::null());
    cmd
}

fn posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
