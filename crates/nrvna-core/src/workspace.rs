//! Workspace directory schema and the atomic-rename primitive.
//!
//! A workspace is a directory on a single local filesystem whose five
//! sub-trees encode the entire job state machine:
//!
//! ```text
//! <workspace>/
//!   input/writing/<id>/   — under construction, never scanned
//!   input/ready/<id>/     — queued
//!   processing/<id>/      — claimed by exactly one worker
//!   output/<id>/          — succeeded (result.txt)
//!   failed/<id>/          — failed (error.txt)
//! ```
//!
//! Every state transition is a single directory rename, which is atomic on a
//! local filesystem: a job occupies exactly one sub-tree at any instant, and
//! a rename race has exactly one winner. That property is the only
//! inter-process coordination mechanism in the system — no locks, no broker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::job::JobId;

/// The five job states, in on-disk form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Writing,
    Ready,
    Processing,
    Output,
    Failed,
}

impl State {
    /// Sub-tree path relative to the workspace root.
    pub fn rel_dir(self) -> &'static str {
        match self {
            State::Writing => "input/writing",
            State::Ready => "input/ready",
            State::Processing => "processing",
            State::Output => "output",
            State::Failed => "failed",
        }
    }

    /// All states, in `prompt()` search precedence order.
    pub const ALL: [State; 5] = [
        State::Output,
        State::Failed,
        State::Processing,
        State::Ready,
        State::Writing,
    ];
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory {0}: {1}")]
    CreateFailed(PathBuf, #[source] io::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, #[source] io::Error),
}

/// Handle to a workspace root. Construction is cheap and performs no I/O;
/// call [`Workspace::ensure_layout`] before relying on the sub-trees.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the five state sub-trees (and the root) if missing.
    pub fn ensure_layout(&self) -> Result<(), WorkspaceError> {
        for state in State::ALL {
            let dir = self.state_dir(state);
            fs::create_dir_all(&dir).map_err(|e| WorkspaceError::CreateFailed(dir.clone(), e))?;
        }
        tracing::debug!(root = %self.root.display(), "workspace layout ready");
        Ok(())
    }

    /// Directory holding all jobs in the given state.
    pub fn state_dir(&self, state: State) -> PathBuf {
        self.root.join(state.rel_dir())
    }

    /// Directory of one job in the given state.
    pub fn job_dir(&self, state: State, id: &str) -> PathBuf {
        self.state_dir(state).join(id)
    }

    /// Atomically move a job between states. This single rename is the
    /// ONE-OF-THESE-WINS primitive: concurrent callers racing on the same
    /// source see exactly one `Ok`.
    pub fn transition(&self, id: &JobId, from: State, to: State) -> io::Result<()> {
        fs::rename(self.job_dir(from, id), self.job_dir(to, id))
    }

    /// Whether a job directory exists in the given state.
    pub fn contains(&self, state: State, id: &str) -> bool {
        self.job_dir(state, id).is_dir()
    }

    /// Best-effort recursive removal of a job directory. Used as the
    /// compensating action when a staged submission fails.
    pub fn remove(&self, state: State, id: &str) {
        let _ = fs::remove_dir_all(self.job_dir(state, id));
    }

    // ── Advisory metadata ─────────────────────────────────────────────────────
    //
    // Consumed by ops tooling; not part of the job protocol. A stale pid
    // file never blocks a new daemon.

    /// Record this process as the daemon serving the workspace.
    pub fn write_pid_file(&self) -> Result<(), WorkspaceError> {
        self.write_marker(".nrvnad.pid", &std::process::id().to_string())
    }

    /// Record the model path the daemon was started with.
    pub fn write_model_marker(&self, model_path: &Path) -> Result<(), WorkspaceError> {
        self.write_marker(".model", &model_path.display().to_string())
    }

    /// Record the multimodal projector path, if any.
    pub fn write_mmproj_marker(&self, mmproj_path: &Path) -> Result<(), WorkspaceError> {
        self.write_marker(".mmproj", &mmproj_path.display().to_string())
    }

    fn write_marker(&self, name: &str, value: &str) -> Result<(), WorkspaceError> {
        let path = self.root.join(name);
        fs::write(&path, value).map_err(|e| WorkspaceError::WriteFailed(path.clone(), e))
    }
}
