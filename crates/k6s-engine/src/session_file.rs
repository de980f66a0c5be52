//! The cross-process session liveness flag.
//!
//! `<project>/.khoregos/daemon.state` holds `{"session_id": …}` while a
//! session is live. Liveness is file existence, not PID tracking: the
//! lifecycle command configures governance and exits, so there is no
//! long-running process to watch. Creation is atomic and refuses when a
//! session is already live; removal is idempotent.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EngineError;

const STATE_FILENAME: &str = "daemon.state";

/// Contents of the state file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
}

/// Handle on a project's lifecycle state file.
pub struct SessionFile {
    khoregos_dir: PathBuf,
}

impl SessionFile {
    #[must_use]
    pub fn new(khoregos_dir: impl Into<PathBuf>) -> Self {
        Self {
            khoregos_dir: khoregos_dir.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.khoregos_dir.join(STATE_FILENAME)
    }

    /// Whether a governance session is currently live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.path().exists()
    }

    /// Atomically create the state file. Fails when one already exists;
    /// exactly one session may be live per project.
    pub fn create(&self, session_id: &str) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.khoregos_dir)?;
        set_mode(&self.khoregos_dir, 0o700);

        let state = SessionState {
            session_id: session_id.to_owned(),
        };
        let json = serde_json::to_string_pretty(&state)?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    EngineError::SessionAlreadyActive(self.path().display().to_string())
                }
                _ => EngineError::Io(e),
            })?;
        file.write_all(json.as_bytes())?;
        set_mode(&self.path(), 0o600);

        debug!(path = %self.path().display(), session_id, "session state file created");
        Ok(())
    }

    /// Read the live session id. Missing or corrupt files read as no
    /// session.
    #[must_use]
    pub fn read(&self) -> Option<SessionState> {
        let raw = std::fs::read_to_string(self.path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Remove the state file. Idempotent.
    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(self.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path().display(), error = %e, "failed to remove state file");
            }
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
