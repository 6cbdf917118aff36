//! Bounded worker pool: N threads draining one FIFO queue.
//!
//! One mutex + condvar guard the queue. Workers wait until the queue is
//! non-empty or shutdown is flagged, dequeue a single id, and invoke the
//! processor callback outside the lock. The pool knows nothing about what
//! the callback does — it is pure dispatch; exclusivity comes from the
//! processor's rename-based claim, so a duplicate submission is harmless.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use nrvna_core::job::JobId;

/// Callback invoked by a worker for each dequeued job.
pub type JobHandler = Arc<dyn Fn(&JobId, usize) + Send + Sync>;

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<JobId>>,
    available: Condvar,
    running: AtomicBool,
    shutdown: AtomicBool,
}

/// Cloneable submission endpoint, used by the dispatcher thread.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// Enqueue a job id. No-op when the pool is stopped or stopping.
    pub fn submit(&self, id: JobId) {
        if !self.shared.running.load(Ordering::SeqCst)
            || self.shared.shutdown.load(Ordering::SeqCst)
        {
            tracing::debug!(job_id = %id, "pool stopped, dropping submission");
            return;
        }
        {
            let mut queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            queue.push_back(id);
        }
        self.shared.available.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The pool itself. Owns the worker threads; dropping it stops them.
#[derive(Debug)]
pub struct Pool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Spawn `workers` threads draining the queue into `handler`.
    pub fn start(workers: usize, handler: JobHandler) -> io::Result<Pool> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = shared.clone();
            let handler = handler.clone();
            let thread = std::thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker_loop(&shared, &handler, index))?;
            threads.push(thread);
        }

        tracing::info!(workers, "worker pool started");
        Ok(Pool { shared, threads })
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: self.shared.clone(),
        }
    }

    /// Cooperative stop: flag, wake everyone, join, clear leftovers.
    /// Workers finish their current job; queued-but-unclaimed jobs stay in
    /// `ready/` on disk and are re-discovered on the next start.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }

        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queue.clear();
        tracing::info!("worker pool stopped");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared, handler: &JobHandler, index: usize) {
    tracing::debug!(worker = index, "worker thread started");
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    tracing::debug!(worker = index, "worker thread stopped");
                    return;
                }
                if let Some(id) = queue.pop_front() {
                    break id;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        handler(&job, index);
    }
}
