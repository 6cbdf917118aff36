//! nrvna integration harness.
//!
//! Every test drives the real daemon assembly — scanner, dispatcher, pool,
//! processor, recovery — against a throwaway workspace, with the echo
//! backend standing in for the accelerator. Workspaces live under the
//! system temp dir and are removed by the tests that create them.

mod concurrency;
mod lifecycle;
mod recovery;
mod vision;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nrvna_core::config::RuntimeConfig;
use nrvna_core::workspace::{State, Workspace};
use nrvna_runtime::engine::{EchoEngine, Engine};
use nrvna_runtime::{Server, ServerOptions};

static WORKSPACE_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A unique, empty workspace root for one test.
pub fn temp_root(tag: &str) -> PathBuf {
    let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "nrvna-it-{tag}-{}-{seq}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(&root).unwrap();
    root
}

/// Write a placeholder model file the echo engine will accept.
pub fn write_model(root: &std::path::Path) -> PathBuf {
    let path = root.join("model.bin");
    fs::write(&path, b"echo weights").unwrap();
    path
}

/// Start a daemon over `root` with the given echo engine.
pub fn start_server(
    root: &std::path::Path,
    engine: &EchoEngine,
    workers: usize,
    mmproj: Option<PathBuf>,
) -> Server {
    let engine: Arc<dyn Engine> = Arc::new(engine.clone());
    Server::start(
        engine,
        ServerOptions {
            model_path: write_model(root),
            mmproj_path: mmproj,
            workspace_root: root.to_path_buf(),
            workers,
        },
        RuntimeConfig::default(),
    )
    .expect("server should start")
}

/// Poll `done` until it returns true or the deadline passes.
pub fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

/// Which state sub-trees currently contain `id`.
///
/// Checked in reverse pipeline order (Failed, Output, Processing, Ready,
/// Writing): transitions only flow forward, so a concurrently moving job can
/// never be observed in two states by this walk.
pub fn observed_states(workspace: &Workspace, id: &str) -> Vec<State> {
    [
        State::Failed,
        State::Output,
        State::Processing,
        State::Ready,
        State::Writing,
    ]
    .into_iter()
    .filter(|state| workspace.contains(*state, id))
    .collect()
}

/// Count job directories in a state sub-tree.
pub fn count_jobs(workspace: &Workspace, state: State) -> usize {
    match fs::read_dir(workspace.state_dir(state)) {
        Ok(entries) => entries.flatten().filter(|e| e.path().is_dir()).count(),
        Err(_) => 0,
    }
}
