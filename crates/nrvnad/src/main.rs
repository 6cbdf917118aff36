//! nrvnad — the nrvna inference daemon.
//!
//! `nrvnad <model_path> <workspace> [workers]` starts the scanner/pool
//! machinery against a workspace and supervises it until SIGINT/SIGTERM.
//! All logs go to stderr; stdout carries only the startup status line.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nrvna_core::config::RuntimeConfig;
use nrvna_runtime::engine::{EchoEngine, Engine};
use nrvna_runtime::server::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS};
use nrvna_runtime::{Server, ServerOptions};

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Args {
    model_path: PathBuf,
    workspace: PathBuf,
    workers: usize,
    mmproj_path: Option<PathBuf>,
}

fn print_usage() {
    println!("nrvnad v{VERSION} — asynchronous inference daemon");
    println!();
    println!("Usage: nrvnad <model_path> <workspace> [workers]");
    println!();
    println!("Arguments:");
    println!("  model_path       Model file (or a name under $NRVNA_MODELS_DIR)");
    println!("  workspace        Directory for job storage");
    println!("  workers          Worker threads, {MIN_WORKERS}-{MAX_WORKERS} (default {DEFAULT_WORKERS})");
    println!();
    println!("Options:");
    println!("  --mmproj <path>    Multimodal projector for vision jobs");
    println!("  -w, --workers <n>  Worker threads, same as the positional form");
    println!("  -h, --help         Show this help message");
    println!("  -v, --version      Show version");
    println!();
    println!("Environment Variables:");
    println!("  NRVNA_LOG_LEVEL    ERROR, WARN, INFO, DEBUG, TRACE (default INFO)");
    println!("  NRVNA_MODELS_DIR   Model auto-discovery root (default ./models)");
}

fn parse_args(argv: &[String]) -> Result<Option<Args>> {
    for arg in argv {
        if arg == "-h" || arg == "--help" {
            print_usage();
            return Ok(None);
        }
        if arg == "-v" || arg == "--version" {
            println!("{VERSION}");
            return Ok(None);
        }
    }

    let mut positional = Vec::new();
    let mut mmproj_path = None;
    let mut workers_flag = None;

    let mut iter = argv.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mmproj" => {
                let value = iter.next().context("--mmproj requires a path")?;
                mmproj_path = Some(PathBuf::from(value));
            }
            "-w" | "--workers" => {
                let value = iter.next().context("--workers requires a count")?;
                workers_flag = Some(value.clone());
            }
            _ => positional.push(arg.clone()),
        }
    }

    if positional.len() < 2 || positional.len() > 3 {
        print_usage();
        bail!("expected <model_path> <workspace> [workers]");
    }

    let workers = match workers_flag.or_else(|| positional.get(2).cloned()) {
        Some(raw) => {
            let parsed: usize = raw
                .parse()
                .with_context(|| format!("invalid worker count: {raw}"))?;
            if !(MIN_WORKERS..=MAX_WORKERS).contains(&parsed) {
                bail!("workers must be between {MIN_WORKERS} and {MAX_WORKERS}");
            }
            parsed
        }
        None => DEFAULT_WORKERS,
    };

    Ok(Some(Args {
        model_path: PathBuf::from(&positional[0]),
        workspace: PathBuf::from(&positional[1]),
        workers,
        mmproj_path,
    }))
}

fn init_logging() {
    let level = std::env::var("NRVNA_LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();
    let directive = match level.as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Accept either a direct model path or a name resolved under the
/// auto-discovery root.
fn resolve_model(path: PathBuf, config: &RuntimeConfig) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path);
    }
    let candidate = config.engine.models_dir.join(&path);
    if candidate.exists() {
        tracing::info!(model = %candidate.display(), "resolved model from models dir");
        return Ok(candidate);
    }
    bail!("model not found: {}", path.display());
}

fn run() -> Result<()> {
    init_logging();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&argv)? else {
        return Ok(());
    };

    let config = RuntimeConfig::load().context("failed to load configuration")?;
    let model_path = resolve_model(args.model_path, &config)?;

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown_requested.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("failed to install signal handler")?;
    }

    let engine: Arc<dyn Engine> = Arc::new(EchoEngine::new());
    let mut server = Server::start(
        engine,
        ServerOptions {
            model_path: model_path.clone(),
            mmproj_path: args.mmproj_path,
            workspace_root: args.workspace.clone(),
            workers: args.workers,
        },
        config,
    )
    .context("failed to start server")?;

    println!("nrvnad v{VERSION} listening on {}", args.workspace.display());
    println!("  model: {}", model_path.display());

    while !shutdown_requested.load(Ordering::SeqCst) && server.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    if shutdown_requested.load(Ordering::SeqCst) {
        tracing::info!("shutdown requested");
    }
    server.shutdown();
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
