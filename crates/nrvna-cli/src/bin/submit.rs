//! submit — queue a prompt into a workspace.
//!
//! Prints the job id on stdout (nothing else, for clean piping); all
//! diagnostics go to stderr. Exit 0 on success, 1 on any failure.

use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use nrvna_core::config::RuntimeConfig;
use nrvna_core::{JobType, Submitter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    println!("nrvna submission tool v{VERSION}");
    println!();
    println!("Usage: submit <workspace> <prompt...> [--image <path> ...]");
    println!("       submit <workspace> <text> --embed");
    println!("       submit <workspace> -     (read prompt from stdin)");
    println!("       submit --help | --version");
    println!();
    println!("Arguments:");
    println!("  workspace     Directory for job storage");
    println!("  prompt        Text prompt for inference (can be multiple words)");
    println!("  -             Read prompt from stdin");
    println!();
    println!("Options:");
    println!("  -i, --image <path>  Attach image (repeatable)");
    println!("  --embed             Submit as embedding job (returns vector)");
    println!("  -h, --help          Show this help message");
    println!("  -v, --version       Show version");
    println!();
    println!("Examples:");
    println!("  submit ./workspace \"What is the capital of France?\"");
    println!("  submit ./workspace \"Machine learning is...\" --embed");
    println!("  echo \"Hello\" | submit ./workspace -");
}

struct Args {
    workspace: PathBuf,
    prompt: String,
    images: Vec<PathBuf>,
    embed: bool,
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

    let Some(workspace) = argv.first() else {
        print_usage();
        anyhow::bail!("missing workspace argument");
    };

    let mut images = Vec::new();
    let mut embed = false;
    let mut words: Vec<&str> = Vec::new();
    let mut explicit_stdin = false;

    let mut iter = argv[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--image" | "-i" => {
                let path = iter.next().context("--image requires a path")?;
                images.push(PathBuf::from(path));
            }
            "--embed" => embed = true,
            "-" => explicit_stdin = true,
            word => words.push(word),
        }
    }

    let prompt = if explicit_stdin || (words.is_empty() && !std::io::stdin().is_terminal()) {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read prompt from stdin")?;
        // A single trailing newline is shell noise, not prompt content.
        if buffer.ends_with('\n') {
            buffer.pop();
        }
        buffer
    } else {
        words.join(" ")
    };

    Ok(Some(Args {
        workspace: PathBuf::from(workspace),
        prompt,
        images,
        embed,
    }))
}

fn init_logging() {
    // Default to warnings only so piped output stays clean.
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

    if args.prompt.is_empty() {
        eprintln!("Error: Empty prompt provided");
        return Ok(1);
    }

    let config = RuntimeConfig::load().context("failed to load configuration")?;
    let submitter = Submitter::open(&args.workspace, &config.limits)
        .context("failed to open workspace")?;

    let result = if args.embed {
        submitter.submit(&args.prompt, JobType::Embed)
    } else if !args.images.is_empty() {
        submitter.submit_with_images(&args.prompt, &args.images)
    } else {
        submitter.submit(&args.prompt, JobType::Text)
    };

    match result {
        Ok(id) => {
            println!("{id}");
            Ok(0)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(1)
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
