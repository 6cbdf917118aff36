//! Orphan reclamation at daemon start.
//!
//! Anything under `processing/` when the daemon boots was mid-flight in a
//! previous incarnation. Each entry goes back to `input/ready/` to be
//! re-discovered by the scanner; if even that rename fails, the job is moved
//! to `failed/` so it cannot wedge the workspace. There is no attempt
//! counter: a job that keeps crashing the daemon re-enters the queue on
//! every start.

use std::fs;

use nrvna_core::workspace::{State, Workspace};

/// Counts from one reclamation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs returned to the queue.
    pub requeued: usize,
    /// Jobs that could not be requeued and were parked in `failed/`.
    pub abandoned: usize,
}

/// Reclaim every orphaned job. Idempotent: a second pass finds an empty
/// `processing/` and reports zeros.
pub fn recover_orphans(workspace: &Workspace) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    let processing = workspace.state_dir(State::Processing);
    let entries = match fs::read_dir(&processing) {
        Ok(entries) => entries,
        Err(_) => return report,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        tracing::warn!(job_id = %id, "recovering orphaned job");
        match workspace.transition(&id, State::Processing, State::Ready) {
            Ok(()) => report.requeued += 1,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "failed to requeue orphan");
                let _ = fs::write(
                    path.join("error.txt"),
                    "Job orphaned by daemon crash and could not be requeued",
                );
                if workspace
                    .transition(&id, State::Processing, State::Failed)
                    .is_ok()
                {
                    report.abandoned += 1;
                }
            }
        }
    }

    if report.requeued > 0 || report.abandoned > 0 {
        tracing::info!(
            requeued = report.requeued,
            abandoned = report.abandoned,
            "orphaned jobs recovered"
        );
    }
    report
}
