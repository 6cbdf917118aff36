//! The dispatcher: a single background thread bridging scanner and pool.
//!
//! Every scan period it enumerates `input/ready/` and offers each id it has
//! not offered before to the pool. The `submitted_ids` set is strictly a
//! micro-optimization — the processor's rename-based claim is the real
//! exclusivity mechanism, so a duplicate offer is safe (the loser observes
//! "already claimed"). The set is pruned by intersecting with the current
//! scan once it grows past a high-water mark.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nrvna_core::job::JobId;

use crate::pool::PoolHandle;
use crate::scanner::Scanner;

/// Time between scans.
pub const SCAN_PERIOD: Duration = Duration::from_secs(5);
/// Shutdown-flag polling granularity inside the inter-scan sleep.
const TICK: Duration = Duration::from_millis(100);
/// Prune `submitted_ids` when it exceeds this many entries.
const SUBMITTED_HIGH_WATER: usize = 1000;

#[derive(Debug)]
pub struct Dispatcher {
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the scan loop. `shutdown` must be flagged before [`stop`] for
    /// the join to return promptly (latency is bounded by one tick).
    ///
    /// [`stop`]: Dispatcher::stop
    pub fn start(
        scanner: Scanner,
        pool: PoolHandle,
        shutdown: Arc<AtomicBool>,
        period: Duration,
    ) -> io::Result<Dispatcher> {
        let thread = std::thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || scan_loop(&scanner, &pool, &shutdown, period))?;
        Ok(Dispatcher {
            thread: Some(thread),
        })
    }

    /// Join the dispatcher thread.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scan_loop(scanner: &Scanner, pool: &PoolHandle, shutdown: &AtomicBool, period: Duration) {
    tracing::debug!("dispatcher started");
    let mut submitted: HashSet<JobId> = HashSet::new();

    while !shutdown.load(Ordering::SeqCst) {
        let jobs = scanner.scan();

        let mut fresh = 0usize;
        for id in &jobs {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if submitted.insert(id.clone()) {
                pool.submit(id.clone());
                fresh += 1;
            }
        }
        if fresh > 0 {
            tracing::debug!(count = fresh, "offered new jobs to pool");
        }

        if submitted.len() > SUBMITTED_HIGH_WATER {
            prune_submitted(&mut submitted, &jobs);
        }

        // Sleep one period in shutdown-checked slices.
        let deadline = Instant::now() + period;
        while Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(TICK.min(period));
        }
    }

    tracing::debug!("dispatcher stopped");
}

/// Drop ids that are no longer queued: anything absent from the current
/// scan has been claimed (or removed) and will never be scanned again.
fn prune_submitted(submitted: &mut HashSet<JobId>, current_scan: &[JobId]) {
    let current: HashSet<&JobId> = current_scan.iter().collect();
    submitted.retain(|id| current.contains(id));
    tracing::debug!(retained = submitted.len(), "pruned submitted-id set");
}
