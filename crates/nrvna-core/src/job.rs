//! Job identity and the job record.
//!
//! Ids are `<micros>_<pid>_<counter>`: a zero-padded 16-digit wall-clock
//! microsecond timestamp, the submitting process id, and a per-process
//! counter. The fixed-width timestamp makes lexicographic order equal
//! submission order across concurrent submitters on one host; the pid and
//! counter make ids unique when timestamps collide.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque, lexicographically sortable job identifier.
pub type JobId = String;

/// What kind of inference a job requests. Stored in `type.txt`;
/// an absent file means [`JobType::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Text,
    Embed,
    Vision,
}

impl JobType {
    /// The wire form written to `type.txt`.
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Text => "text",
            JobType::Embed => "embed",
            JobType::Vision => "vision",
        }
    }

    /// Parse the contents of `type.txt`. Unknown values are treated as
    /// text so that a newer submitter never wedges an older daemon.
    pub fn parse(value: &str) -> JobType {
        match value.trim() {
            "embed" => JobType::Embed,
            "vision" => JobType::Vision,
            _ => JobType::Text,
        }
    }
}

/// Where a job currently lives, derived from directory membership.
///
/// Resolution order is Done, Failed, Running, Queued, Missing — terminal
/// states shadow transient ones when a reader races a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Queued,
    Running,
    Done,
    Failed,
    Missing,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::Done => "DONE",
            Status::Failed => "FAILED",
            Status::Missing => "MISSING",
        };
        f.write_str(s)
    }
}

/// A retrieved job: terminal jobs carry their payload (`result.txt` or
/// `error.txt`), non-terminal jobs carry empty content.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: Status,
    pub content: String,
    pub timestamp: SystemTime,
}

/// Microsecond width: 16 digits covers wall-clock time well past year 2200.
const MICROS_WIDTH: usize = 16;

static LAST_MICROS: AtomicU64 = AtomicU64::new(0);
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh job id, strictly increasing within this process.
pub fn generate_id() -> JobId {
    let micros = monotonic_micros();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{micros:0width$}_{pid}_{counter}",
        width = MICROS_WIDTH,
        pid = std::process::id(),
    )
}

/// Current wall-clock microseconds, bumped so that repeated calls never
/// return the same or a smaller value even if the system clock steps back.
fn monotonic_micros() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}
