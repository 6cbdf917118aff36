//! Discovery of queued jobs.
//!
//! A directory under `input/ready/` is a valid job iff it is a directory
//! containing a regular, non-empty `prompt.txt`. Ids come back
//! lexicographically sorted; ids embed a fixed-width monotonic timestamp, so
//! this is FIFO by submission. Scan errors are swallowed — a transient
//! filesystem hiccup yields an empty scan, never a crash.

use std::fs;
use std::path::Path;

use nrvna_core::job::JobId;
use nrvna_core::workspace::{State, Workspace};

pub struct Scanner {
    workspace: Workspace,
}

impl Scanner {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// All valid queued job ids, oldest first.
    pub fn scan(&self) -> Vec<JobId> {
        let ready = self.workspace.state_dir(State::Ready);
        let entries = match fs::read_dir(&ready) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %ready.display(), error = %e, "ready directory not readable");
                return Vec::new();
            }
        };

        let mut jobs: Vec<JobId> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if !is_valid_job_dir(&path) {
                    return None;
                }
                path.file_name()?.to_str().map(str::to_string)
            })
            .collect();

        jobs.sort();
        if !jobs.is_empty() {
            tracing::debug!(count = jobs.len(), "scanner found ready jobs");
        }
        jobs
    }

    /// Cheap check used by dashboards: is anything queued at all?
    pub fn has_ready_jobs(&self) -> bool {
        self.ready_count() > 0
    }

    pub fn ready_count(&self) -> usize {
        let ready = self.workspace.state_dir(State::Ready);
        match fs::read_dir(ready) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| is_valid_job_dir(&e.path()))
                .count(),
            Err(_) => 0,
        }
    }
}

fn is_valid_job_dir(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let prompt = path.join("prompt.txt");
    match fs::metadata(&prompt) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
