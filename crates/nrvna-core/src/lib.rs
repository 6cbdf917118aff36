//! nrvna-core — the on-disk job protocol shared by every nrvna process.
//!
//! Submitters, retrievers, and the daemon coordinate exclusively through
//! atomic directory renames inside a shared workspace; this crate owns the
//! directory schema, the job model, and the producer/consumer operations.
//! Nothing here talks to an inference engine.

pub mod config;
pub mod job;
pub mod retrieve;
pub mod submit;
pub mod workspace;

pub use job::{Job, JobId, JobType, Status};
pub use retrieve::Retriever;
pub use submit::{SubmitError, Submitter};
pub use workspace::{State, Workspace, WorkspaceError};
