//! retrieve — read a job's result out of a workspace.
//!
//! Exit codes are status-aware so shell scripts can poll:
//!   0 — job Done, result on stdout
//!   1 — job missing or failed, diagnostics on stderr
//!   2 — job exists but is not ready yet
//!
//! With no id, the newest terminal job is used; when stdin is piped, the id
//! is read from it (so `submit … | retrieve … -w` composes).

use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use nrvna_core::{Retriever, Status};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn print_usage() {
    println!("nrvna retrieval tool v{VERSION}");
    println!();
    println!("Usage: retrieve <workspace> [job_id] [-w|--wait]");
    println!();
    println!("Arguments:");
    println!("  workspace     Directory for job storage");
    println!("  job_id        Specific job id to retrieve (optional)");
    println!();
    println!("Options:");
    println!("  -w, --wait    Poll until the job reaches Done or Failed");
    println!("  -h, --help    Show this help message");
    println!("  -v, --version Show version");
    println!();
    println!("Behavior:");
    println!("  - With a job id: retrieve that job");
    println!("  - Without one: retrieve the latest completed job");
    println!("  - Piped stdin supplies the job id when the argument is absent");
}

struct Args {
    workspace: PathBuf,
    job_id: Option<String>,
    wait: bool,
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

    let mut wait = false;
    let mut positional = Vec::new();
    for arg in argv {
        match arg.as_str() {
            "-w" | "--wait" => wait = true,
            other => positional.push(other.to_string()),
        }
    }

    if positional.is_empty() || positional.len() > 2 {
        print_usage();
        anyhow::bail!("expected <workspace> [job_id]");
    }

    let mut job_id = positional.get(1).cloned();
    if job_id.is_none() && !std::io::stdin().is_terminal() {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read job id from stdin")?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            job_id = Some(trimmed.to_string());
        }
    }

    Ok(Some(Args {
        workspace: PathBuf::from(&positional[0]),
        job_id,
        wait,
    }))
}

fn init_logging() {
    let level = std::env::var("NRVNA_LOG_LEVEL")
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase();
    let directive = match level.as_str() {
        "error" => "error",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    init_logging();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&argv)? else {
        return Ok(0);
    };

    let retriever = Retriever::new(&args.workspace);

    let job_id = match &args.job_id {
        Some(id) => id.clone(),
        None => match retriever.latest() {
            Some(job) => job.id,
            None => {
                eprintln!("No jobs found");
                return Ok(1);
            }
        },
    };

    if args.wait {
        while !retriever.status(&job_id).is_terminal() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    let Some(job) = retriever.get(&job_id) else {
        eprintln!("Job not found: {job_id}");
        return Ok(1);
    };

    match job.status {
        Status::Done => {
            println!("{}", job.content);
            Ok(0)
        }
        Status::Failed => {
            eprintln!("Job failed: {job_id}");
            if !job.content.is_empty() {
                eprintln!("Error: {}", job.content);
            }
            Ok(1)
        }
        status => {
            eprintln!("Job not ready: {job_id} (status: {status})");
            Ok(2)
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
