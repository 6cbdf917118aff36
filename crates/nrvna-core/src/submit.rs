//! Producer side of the protocol: build a job atomically.
//!
//! All files are staged under `input/writing/<id>/` and the finished
//! directory is renamed into `input/ready/<id>/` in one step, so the scanner
//! can never observe a partial job. Any staging failure triggers best-effort
//! removal of the half-built directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::LimitsConfig;
use crate::job::{self, JobId, JobType};
use crate::workspace::{State, Workspace};

/// Image extensions accepted for vision jobs.
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Why a submission was rejected. The variant is the machine-readable kind;
/// the message is what the CLI prints.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Empty prompt, bad image path, or unsupported image extension.
    #[error("{0}")]
    InvalidContent(String),
    /// Prompt or image over the configured byte limit.
    #[error("{0}")]
    InvalidSize(String),
    /// Filesystem failure while staging or publishing.
    #[error("{0}")]
    IoError(String),
    /// The workspace itself could not be prepared.
    #[error("{0}")]
    WorkspaceError(String),
}

/// Builds and publishes jobs into a workspace.
pub struct Submitter {
    workspace: Workspace,
    max_prompt_bytes: u64,
    max_image_bytes: u64,
}

impl Submitter {
    /// Open a workspace for submission, creating the layout if missing.
    pub fn open(root: impl Into<PathBuf>, limits: &LimitsConfig) -> Result<Self, SubmitError> {
        let workspace = Workspace::new(root);
        workspace
            .ensure_layout()
            .map_err(|e| SubmitError::WorkspaceError(e.to_string()))?;
        Ok(Self {
            workspace,
            max_prompt_bytes: limits.max_prompt_bytes,
            max_image_bytes: limits.max_image_bytes,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Submit a text or embedding job. Returns the published job id.
    pub fn submit(&self, prompt: &str, job_type: JobType) -> Result<JobId, SubmitError> {
        self.validate_prompt(prompt)?;
        self.stage_and_publish(prompt, job_type, &[])
    }

    /// Submit a vision job with image attachments. An empty image list
    /// degrades to a plain text job.
    pub fn submit_with_images(
        &self,
        prompt: &str,
        images: &[PathBuf],
    ) -> Result<JobId, SubmitError> {
        self.validate_prompt(prompt)?;
        if images.is_empty() {
            return self.stage_and_publish(prompt, JobType::Text, &[]);
        }
        for path in images {
            self.validate_image(path)?;
        }
        self.stage_and_publish(prompt, JobType::Vision, images)
    }

    // ── Validation ────────────────────────────────────────────────────────────

    fn validate_prompt(&self, prompt: &str) -> Result<(), SubmitError> {
        if prompt.is_empty() {
            return Err(SubmitError::InvalidContent("Prompt is empty".into()));
        }
        if prompt.len() as u64 > self.max_prompt_bytes {
            return Err(SubmitError::InvalidSize(format!(
                "Prompt exceeds maximum size limit ({} bytes)",
                self.max_prompt_bytes
            )));
        }
        Ok(())
    }

    fn validate_image(&self, path: &Path) -> Result<(), SubmitError> {
        if !path.exists() {
            return Err(SubmitError::InvalidContent(format!(
                "Image file not found: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(SubmitError::InvalidContent(format!(
                "Image path is not a file: {}",
                path.display()
            )));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => {}
            Some(_) => {
                return Err(SubmitError::InvalidContent(format!(
                    "Unsupported image extension: {}",
                    path.display()
                )))
            }
            None => {
                return Err(SubmitError::InvalidContent(format!(
                    "Image file has no extension: {}",
                    path.display()
                )))
            }
        }
        let size = fs::metadata(path)
            .map_err(|_| {
                SubmitError::IoError(format!("Failed to read image size: {}", path.display()))
            })?
            .len();
        if size > self.max_image_bytes {
            return Err(SubmitError::InvalidSize(format!(
                "Image exceeds size limit ({} bytes): {}",
                self.max_image_bytes,
                path.display()
            )));
        }
        Ok(())
    }

    // ── Staging ───────────────────────────────────────────────────────────────

    fn stage_and_publish(
        &self,
        prompt: &str,
        job_type: JobType,
        images: &[PathBuf],
    ) -> Result<JobId, SubmitError> {
        let id = job::generate_id();
        tracing::debug!(job_id = %id, ?job_type, "staging job");

        let staged = self.stage(&id, prompt, job_type, images);
        if let Err(e) = staged {
            self.workspace.remove(State::Writing, &id);
            return Err(e);
        }

        // The publish point: after this rename the job is visible to the
        // scanner, complete.
        if let Err(e) = self.workspace.transition(&id, State::Writing, State::Ready) {
            tracing::error!(job_id = %id, error = %e, "failed to publish job");
            self.workspace.remove(State::Writing, &id);
            return Err(SubmitError::IoError("Failed to publish job".into()));
        }

        tracing::info!(job_id = %id, ?job_type, "job submitted");
        Ok(id)
    }

    fn stage(
        &self,
        id: &JobId,
        prompt: &str,
        job_type: JobType,
        images: &[PathBuf],
    ) -> Result<(), SubmitError> {
        let dir = self.workspace.job_dir(State::Writing, id);
        fs::create_dir_all(&dir)
            .map_err(|_| SubmitError::IoError("Failed to create job directory".into()))?;

        write_flushed(&dir.join("prompt.txt"), prompt.as_bytes())
            .map_err(|_| SubmitError::IoError("Failed to write prompt file".into()))?;

        if job_type != JobType::Text {
            write_flushed(&dir.join("type.txt"), job_type.as_str().as_bytes())
                .map_err(|_| SubmitError::IoError("Failed to write type file".into()))?;
        }

        if !images.is_empty() {
            stage_images(&dir, images, id)?;
        }
        Ok(())
    }
}

/// Write a file and flush it before returning, so the subsequent publish
/// rename never exposes a short read.
fn write_flushed(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.flush()
}

/// Materialize attachments under `<job>/images/image_<n>.<ext>`.
///
/// Same-filesystem sources become absolute-path symlinks (the link survives
/// the job directory's later renames); anything else — including a failed
/// symlink — is copied.
fn stage_images(job_dir: &Path, images: &[PathBuf], id: &JobId) -> Result<(), SubmitError> {
    let images_dir = job_dir.join("images");
    fs::create_dir_all(&images_dir)
        .map_err(|_| SubmitError::IoError("Failed to create images directory".into()))?;

    for (idx, src) in images.iter().enumerate() {
        let ext = src
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let dest = images_dir.join(format!("image_{idx}.{ext}"));

        let linked = same_filesystem(src, &images_dir) && link_absolute(src, &dest).is_ok();
        if !linked {
            fs::copy(src, &dest).map_err(|e| {
                tracing::error!(job_id = %id, src = %src.display(), error = %e, "failed to stage image");
                SubmitError::IoError(format!("Failed to write image file: {}", src.display()))
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn link_absolute(src: &Path, dest: &Path) -> std::io::Result<()> {
    let absolute = src.canonicalize()?;
    std::os::unix::fs::symlink(absolute, dest)
}

#[cfg(not(unix))]
fn link_absolute(_src: &Path, _dest: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks unavailable",
    ))
}

#[cfg(unix)]
fn same_filesystem(src: &Path, dest_dir: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(src), fs::metadata(dest_dir)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_filesystem(_src: &Path, _dest_dir: &Path) -> bool {
    false
}
