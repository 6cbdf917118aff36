//! Consumer side of the protocol: resolve a job's state and read payloads.
//!
//! Status is derived purely from directory membership, checked in the order
//! Done → Failed → Running → Queued → Missing so a reader racing a rename
//! resolves to the later state.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::job::{Job, Status};
use crate::workspace::{State, Workspace};

/// Read-only accessor over a workspace. Safe to use from any process while
/// the daemon runs; all reads race renames benignly.
pub struct Retriever {
    workspace: Workspace,
}

impl Retriever {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace: Workspace::new(root),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Directory-membership status check.
    pub fn status(&self, id: &str) -> Status {
        if self.workspace.contains(State::Output, id) {
            Status::Done
        } else if self.workspace.contains(State::Failed, id) {
            Status::Failed
        } else if self.workspace.contains(State::Processing, id) {
            Status::Running
        } else if self.workspace.contains(State::Ready, id) {
            Status::Queued
        } else {
            Status::Missing
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.status(id) != Status::Missing
    }

    /// Resolve a job and its terminal payload. Non-terminal jobs come back
    /// with empty content; unknown ids (and terminal directories whose
    /// payload file has vanished) come back as `None`.
    pub fn get(&self, id: &str) -> Option<Job> {
        match self.status(id) {
            Status::Done => {
                let dir = self.workspace.job_dir(State::Output, id);
                let content = fs::read_to_string(dir.join("result.txt")).ok()?;
                Some(Job {
                    id: id.to_string(),
                    status: Status::Done,
                    content,
                    timestamp: dir_mtime(&dir),
                })
            }
            Status::Failed => {
                let dir = self.workspace.job_dir(State::Failed, id);
                let content = fs::read_to_string(dir.join("error.txt")).unwrap_or_default();
                Some(Job {
                    id: id.to_string(),
                    status: Status::Failed,
                    content,
                    timestamp: dir_mtime(&dir),
                })
            }
            Status::Missing => None,
            status => Some(Job {
                id: id.to_string(),
                status,
                content: String::new(),
                timestamp: SystemTime::now(),
            }),
        }
    }

    /// Newest terminal job, by directory modification time.
    ///
    /// Only `output/` and `failed/` are consulted: a workspace whose jobs
    /// are all still in flight reports no jobs.
    pub fn latest(&self) -> Option<Job> {
        self.list(1).into_iter().next()
    }

    /// Terminal jobs ordered newest-first, up to `max`. Contents are not
    /// loaded; pass an id to [`Retriever::get`] for the payload.
    pub fn list(&self, max: usize) -> Vec<Job> {
        let mut jobs = Vec::new();
        for (state, status) in [(State::Output, Status::Done), (State::Failed, Status::Failed)] {
            let dir = self.workspace.state_dir(state);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                jobs.push(Job {
                    id: id.to_string(),
                    status,
                    content: String::new(),
                    timestamp: dir_mtime(&path),
                });
            }
        }
        jobs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        jobs.truncate(max);
        jobs
    }

    /// The original prompt, wherever the job currently lives.
    pub fn prompt(&self, id: &str) -> Option<String> {
        for state in State::ALL {
            let path = self.workspace.job_dir(state, id).join("prompt.txt");
            if path.is_file() {
                return fs::read_to_string(path).ok();
            }
        }
        None
    }

    /// The failure message of a failed job.
    pub fn error(&self, id: &str) -> Option<String> {
        let path = self.workspace.job_dir(State::Failed, id).join("error.txt");
        if path.is_file() {
            fs::read_to_string(path).ok()
        } else {
            None
        }
    }
}

fn dir_mtime(path: &std::path::Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
