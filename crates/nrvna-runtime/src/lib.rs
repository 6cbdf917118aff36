//! nrvna-runtime — everything the daemon runs that a submitter never needs.
//!
//! The scanner discovers queued jobs, the dispatcher offers them to a pool
//! of worker threads, and each worker drives the processor: claim the job by
//! rename, run inference through its own pre-created runner, and finalize
//! into a terminal state. The inference library itself sits behind the
//! [`engine`] trait seam.

pub mod dispatch;
pub mod engine;
pub mod pool;
pub mod processor;
pub mod recovery;
pub mod runner;
pub mod scanner;
pub mod server;

pub use processor::{ProcessOutcome, Processor};
pub use runner::Runner;
pub use server::{Server, ServerError, ServerOptions};
