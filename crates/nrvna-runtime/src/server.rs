//! Daemon assembly: workspace, recovery, runners, pool, dispatcher.
//!
//! Startup order is load-bearing: the workspace layout and orphan recovery
//! come first (so the first scan sees reclaimed jobs), then every runner is
//! pre-created serially on the calling thread (one-time backend side effects
//! happen before any worker exists), and only then do the pool and
//! dispatcher threads start. Shutdown reverses it: flag, join the
//! dispatcher, drain and join the pool.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nrvna_core::config::RuntimeConfig;
use nrvna_core::workspace::{Workspace, WorkspaceError};
use thiserror::Error;

use crate::dispatch::{self, Dispatcher};
use crate::engine::{Engine, EngineError};
use crate::pool::{JobHandler, Pool};
use crate::processor::Processor;
use crate::recovery;
use crate::scanner::Scanner;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 64;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("worker count {0} out of range [{MIN_WORKERS}, {MAX_WORKERS}]")]
    InvalidWorkers(usize),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub model_path: PathBuf,
    pub mmproj_path: Option<PathBuf>,
    pub workspace_root: PathBuf,
    pub workers: usize,
}

/// A running daemon. Dropping it shuts it down.
#[derive(Debug)]
pub struct Server {
    workspace: Workspace,
    pool: Pool,
    dispatcher: Dispatcher,
    shutdown: Arc<AtomicBool>,
    running: bool,
}

impl Server {
    pub fn start(
        engine: Arc<dyn Engine>,
        options: ServerOptions,
        config: RuntimeConfig,
    ) -> Result<Server, ServerError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&options.workers) {
            return Err(ServerError::InvalidWorkers(options.workers));
        }

        tracing::info!(
            model = %options.model_path.display(),
            workspace = %options.workspace_root.display(),
            workers = options.workers,
            "starting server"
        );

        let workspace = Workspace::new(&options.workspace_root);
        workspace.ensure_layout()?;

        // Advisory markers for ops tooling; failure to write them never
        // blocks startup.
        if let Err(e) = workspace.write_pid_file() {
            tracing::warn!(error = %e, "could not write pid file");
        }
        if let Err(e) = workspace.write_model_marker(&options.model_path) {
            tracing::warn!(error = %e, "could not write model marker");
        }
        if let Some(mmproj) = &options.mmproj_path {
            if let Err(e) = workspace.write_mmproj_marker(mmproj) {
                tracing::warn!(error = %e, "could not write mmproj marker");
            }
        }

        recovery::recover_orphans(&workspace);

        let mut processor = Processor::new(workspace.clone());
        tracing::debug!(workers = options.workers, "pre-initializing runners");
        processor.initialize_runners(
            engine.as_ref(),
            &options.model_path,
            options.mmproj_path.as_deref(),
            options.workers,
            &config,
        )?;
        let processor = Arc::new(processor);

        let handler: JobHandler = {
            let processor = processor.clone();
            Arc::new(move |id, worker| {
                let _ = processor.process(id, worker);
            })
        };
        let pool = Pool::start(options.workers, handler)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::start(
            Scanner::new(workspace.clone()),
            pool.handle(),
            shutdown.clone(),
            dispatch::SCAN_PERIOD,
        )?;

        tracing::info!("server started");
        Ok(Server {
            workspace,
            pool,
            dispatcher,
            shutdown,
            running: true,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Cooperative shutdown: workers finish their current job, queued jobs
    /// stay on disk for the next incarnation.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        tracing::info!("shutting down server");
        self.shutdown.store(true, Ordering::SeqCst);
        self.dispatcher.stop();
        self.pool.stop();
        tracing::info!("server shutdown complete");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
