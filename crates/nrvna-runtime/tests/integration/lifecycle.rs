//! End-to-end job lifecycle: submit → scan → claim → infer → retrieve.

use std::fs;
use std::time::Duration;

use nrvna_core::config::LimitsConfig;
use nrvna_core::workspace::State;
use nrvna_core::{JobType, Retriever, Status, Submitter};
use nrvna_runtime::engine::EchoEngine;

use crate::{count_jobs, start_server, temp_root, wait_for};

/// A prompt submitted to a running daemon comes back whole.
#[test]
fn text_job_completes_end_to_end() {
    let root = temp_root("echo");
    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 2, None);

    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let id = submitter.submit("hello", JobType::Text).unwrap();

    let retriever = Retriever::new(&root);
    // Submission happened after the first scan, so discovery costs up to one
    // full scan period.
    assert!(
        wait_for(Duration::from_secs(15), || retriever
            .status(&id)
            .is_terminal()),
        "job never reached a terminal state"
    );

    let job = retriever.get(&id).unwrap();
    assert_eq!(job.status, Status::Done);
    assert_eq!(job.content, "hello");

    // Terminal status is stable.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(retriever.status(&id), Status::Done);

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// Queued-before-start jobs are discovered by the first scan.
#[test]
fn jobs_queued_before_start_are_processed() {
    let root = temp_root("prequeued");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let ids: Vec<_> = (0..5)
        .map(|i| submitter.submit(&format!("prompt {i}"), JobType::Text).unwrap())
        .collect();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 2, None);

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || ids
        .iter()
        .all(|id| retriever.status(id).is_terminal())));

    for (i, id) in ids.iter().enumerate() {
        let job = retriever.get(id).unwrap();
        assert_eq!(job.status, Status::Done);
        assert_eq!(job.content, format!("prompt {i}"));
    }

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// With a single worker, completion follows submission order.
#[test]
fn single_worker_completes_fifo() {
    let root = temp_root("fifo");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    // Space completions apart so terminal mtimes order strictly.
    let ids: Vec<_> = (0..10)
        .map(|i| {
            submitter
                .submit(&format!("p{i} <<sleep:10>>"), JobType::Text)
                .unwrap()
        })
        .collect();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 1, None);

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || ids
        .iter()
        .all(|id| retriever.status(id).is_terminal())));
    server.shutdown();

    let workspace = retriever.workspace().clone();
    let timestamps: Vec<_> = ids
        .iter()
        .map(|id| {
            fs::metadata(workspace.job_dir(State::Output, id))
                .and_then(|m| m.modified())
                .unwrap()
        })
        .collect();
    for pair in timestamps.windows(2) {
        assert!(pair[0] <= pair[1], "completion order violated submission order");
    }
    let _ = fs::remove_dir_all(&root);
}

/// A failing inference lands in failed/ with the engine's message.
#[test]
fn failed_inference_lands_in_failed() {
    let root = temp_root("fail");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let id = submitter
        .submit("this will <<fail>> during decode", JobType::Text)
        .unwrap();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 1, None);

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || retriever
        .status(&id)
        .is_terminal()));
    assert_eq!(retriever.status(&id), Status::Failed);
    assert!(retriever.error(&id).unwrap().contains("Failed to decode"));

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// Embedding jobs produce a vector, one component per line.
#[test]
fn embed_job_round_trips() {
    let root = temp_root("embed");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let id = submitter.submit("vectorize me", JobType::Embed).unwrap();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 1, None);

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || retriever
        .status(&id)
        .is_terminal()));

    let job = retriever.get(&id).unwrap();
    assert_eq!(job.status, Status::Done);
    let values: Vec<f32> = job
        .content
        .lines()
        .map(|line| line.parse().unwrap())
        .collect();
    assert_eq!(values.len(), 64);

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// After a full run nothing is left outside the terminal trees.
#[test]
fn workspace_is_clean_after_completion() {
    let root = temp_root("clean");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    for i in 0..4 {
        submitter.submit(&format!("job {i}"), JobType::Text).unwrap();
    }

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 2, None);

    let workspace = submitter.workspace().clone();
    assert!(wait_for(Duration::from_secs(10), || count_jobs(
        &workspace,
        State::Output
    ) == 4));
    server.shutdown();

    assert_eq!(count_jobs(&workspace, State::Writing), 0);
    assert_eq!(count_jobs(&workspace, State::Ready), 0);
    assert_eq!(count_jobs(&workspace, State::Processing), 0);
    assert_eq!(count_jobs(&workspace, State::Failed), 0);
    let _ = fs::remove_dir_all(&root);
}
