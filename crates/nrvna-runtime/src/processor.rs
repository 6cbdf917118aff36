//! Claim-and-finalize: the worker-side job algorithm.
//!
//! The claim is a single rename of `input/ready/<id>` to `processing/<id>`;
//! the filesystem guarantees at most one worker wins it, which is the only
//! exclusivity mechanism in the system. After inference the result is
//! written to a temp file, flushed, renamed into place, and the whole job
//! directory is renamed into its terminal state — readers never observe a
//! half-written payload.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use nrvna_core::config::RuntimeConfig;
use nrvna_core::job::{JobId, JobType};
use nrvna_core::workspace::{State, Workspace};

use crate::engine::{Engine, EngineError};
use crate::runner::Runner;

/// Outcome of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Job finished and landed in `output/`.
    Success,
    /// Inference (or the prompt itself) failed; job landed in `failed/`.
    Failed,
    /// The claim was lost — another worker owns the job, or it vanished.
    NotFound,
    /// Finalization could not move the job; it stays in `processing/` and
    /// is reclaimed on the next daemon start.
    SystemError,
}

pub struct Processor {
    workspace: Workspace,
    runners: Vec<Mutex<Runner>>,
}

impl Processor {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            runners: Vec::new(),
        }
    }

    /// Build one runner per worker, serially, on the caller's thread. Must
    /// complete before the pool starts: workers index this sealed vector by
    /// position and it is never mutated afterwards.
    pub fn initialize_runners(
        &mut self,
        engine: &dyn Engine,
        model_path: &Path,
        mmproj_path: Option<&Path>,
        workers: usize,
        config: &RuntimeConfig,
    ) -> Result<(), EngineError> {
        let mut runners = Vec::with_capacity(workers);
        for index in 0..workers {
            tracing::debug!(worker = index, "pre-creating runner");
            runners.push(Mutex::new(Runner::new(
                engine,
                model_path,
                mmproj_path,
                workers,
                config,
            )?));
        }
        self.runners = runners;
        tracing::info!(workers, "runners initialized");
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.runners.len()
    }

    /// Claim → read prompt → infer → finalize.
    pub fn process(&self, id: &JobId, worker: usize) -> ProcessOutcome {
        // Unknown worker index means the pool was started before
        // initialize_runners — a programmer error, not a job failure.
        let runner = self
            .runners
            .get(worker)
            .unwrap_or_else(|| panic!("runner not initialized for worker {worker}"));

        if self
            .workspace
            .transition(id, State::Ready, State::Processing)
            .is_err()
        {
            tracing::debug!(job_id = %id, "job already claimed or missing");
            return ProcessOutcome::NotFound;
        }
        tracing::info!(job_id = %id, worker, "job running");
        let started = Instant::now();

        let job_dir = self.workspace.job_dir(State::Processing, id);
        let prompt = fs::read_to_string(job_dir.join("prompt.txt")).unwrap_or_default();
        if prompt.is_empty() {
            tracing::warn!(job_id = %id, "prompt unreadable or empty");
            return self.fail(id, "Failed to read prompt file");
        }

        let job_type = read_job_type(&job_dir);
        let images = list_images(&job_dir);

        let result = {
            let mut runner = runner.lock().unwrap_or_else(PoisonError::into_inner);
            match job_type {
                JobType::Embed => runner.embed(&prompt).map(format_embedding),
                JobType::Vision => runner.run_vision(&prompt, &images),
                JobType::Text if !images.is_empty() => runner.run_vision(&prompt, &images),
                JobType::Text => runner.run_text(&prompt),
            }
        };

        let elapsed_secs = started.elapsed().as_secs_f64();
        match result {
            Ok(output) => {
                if self.finalize_success(id, &output) {
                    tracing::info!(
                        job_id = %id,
                        bytes = output.len(),
                        elapsed_secs,
                        "job completed"
                    );
                    ProcessOutcome::Success
                } else {
                    tracing::error!(job_id = %id, "failed to finalize successful job");
                    ProcessOutcome::SystemError
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    error = %e,
                    elapsed_secs,
                    "job failed during inference"
                );
                self.fail(id, &e.to_string())
            }
        }
    }

    fn fail(&self, id: &JobId, message: &str) -> ProcessOutcome {
        if self.finalize_failure(id, message) {
            ProcessOutcome::Failed
        } else {
            ProcessOutcome::SystemError
        }
    }

    /// Two-step publish: temp write + rename keeps readers off half-written
    /// results; the directory rename is the terminal transition.
    fn finalize_success(&self, id: &JobId, output: &str) -> bool {
        let dir = self.workspace.job_dir(State::Processing, id);
        let tmp = dir.join("result.txt.tmp");

        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(output.as_bytes())?;
                file.flush()
            })
            .and_then(|_| fs::rename(&tmp, dir.join("result.txt")));
        if let Err(e) = written {
            tracing::error!(job_id = %id, error = %e, "failed to write result");
            return false;
        }

        match self.workspace.transition(id, State::Processing, State::Output) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "failed to move job to output");
                false
            }
        }
    }

    /// The error file is best-effort: a job must reach `failed/` even when
    /// its message cannot be written.
    fn finalize_failure(&self, id: &JobId, message: &str) -> bool {
        let dir = self.workspace.job_dir(State::Processing, id);
        if let Err(e) = fs::write(dir.join("error.txt"), message) {
            tracing::warn!(job_id = %id, error = %e, "failed to write error file");
        }

        match self.workspace.transition(id, State::Processing, State::Failed) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "failed to move job to failed");
                false
            }
        }
    }
}

fn read_job_type(job_dir: &Path) -> JobType {
    match fs::read_to_string(job_dir.join("type.txt")) {
        Ok(contents) => JobType::parse(&contents),
        Err(_) => JobType::Text,
    }
}

/// Image attachments in index order.
fn list_images(job_dir: &Path) -> Vec<PathBuf> {
    let images_dir = job_dir.join("images");
    let Ok(entries) = fs::read_dir(images_dir) else {
        return Vec::new();
    };
    let mut images: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    images.sort();
    images
}

fn format_embedding(vector: Vec<f32>) -> String {
    let mut out = String::with_capacity(vector.len() * 12);
    for value in vector {
        out.push_str(&format!("{value}\n"));
    }
    out
}
