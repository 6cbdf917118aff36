//! Claim exclusivity and single-occupancy under many workers.

use std::fs;
use std::time::Duration;

use nrvna_core::config::LimitsConfig;
use nrvna_core::workspace::State;
use nrvna_core::{JobType, Retriever, Submitter};
use nrvna_runtime::engine::EchoEngine;

use crate::{count_jobs, observed_states, start_server, temp_root, wait_for};

/// 100 queued jobs, 8 workers: exactly 100 terminal jobs, zero left in
/// processing, each with exactly one payload file.
#[test]
fn every_claim_is_exclusive() {
    let root = temp_root("claims");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let ids: Vec<_> = (0..100)
        .map(|i| submitter.submit(&format!("job number {i}"), JobType::Text).unwrap())
        .collect();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 8, None);

    let workspace = submitter.workspace().clone();
    assert!(
        wait_for(Duration::from_secs(30), || {
            count_jobs(&workspace, State::Output) + count_jobs(&workspace, State::Failed) == 100
        }),
        "not all jobs reached a terminal state"
    );
    server.shutdown();

    assert_eq!(count_jobs(&workspace, State::Processing), 0);
    assert_eq!(count_jobs(&workspace, State::Ready), 0);

    for id in &ids {
        let output = workspace.job_dir(State::Output, id);
        let failed = workspace.job_dir(State::Failed, id);
        let has_result = output.join("result.txt").is_file();
        let has_error = failed.join("error.txt").is_file();
        assert!(
            has_result ^ has_error,
            "job {id} must have exactly one payload (result: {has_result}, error: {has_error})"
        );
    }
    let _ = fs::remove_dir_all(&root);
}

/// While jobs move through the pipeline, no id is ever observable in two
/// state sub-trees at once.
#[test]
fn jobs_occupy_one_state_at_a_time() {
    let root = temp_root("occupancy");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let ids: Vec<_> = (0..12)
        .map(|i| {
            submitter
                .submit(&format!("slow job {i} <<sleep:30>>"), JobType::Text)
                .unwrap()
        })
        .collect();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 4, None);

    let workspace = submitter.workspace().clone();
    let retriever = Retriever::new(&root);

    // Sample aggressively while the pipeline is busy.
    let all_done = wait_for(Duration::from_secs(15), || {
        for id in &ids {
            let states = observed_states(&workspace, id);
            assert!(
                states.len() <= 1,
                "job {id} observed in multiple states: {states:?}"
            );
        }
        ids.iter().all(|id| retriever.status(id).is_terminal())
    });
    assert!(all_done, "jobs never drained");

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// Shutdown with work still queued returns promptly and leaves the
/// unclaimed remainder in ready/ for the next incarnation.
#[test]
fn shutdown_leaves_unclaimed_work_queued() {
    let root = temp_root("shutdown");
    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    for i in 0..6 {
        submitter
            .submit(&format!("lingering {i} <<sleep:200>>"), JobType::Text)
            .unwrap();
    }

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 1, None);

    let workspace = submitter.workspace().clone();
    // Let the first job get claimed.
    assert!(wait_for(Duration::from_secs(5), || count_jobs(
        &workspace,
        State::Processing
    ) > 0
        || count_jobs(&workspace, State::Output) > 0));

    let started = std::time::Instant::now();
    server.shutdown();
    // Workers finish their current job only; nothing waits on the backlog.
    assert!(started.elapsed() < Duration::from_secs(3));

    let total = count_jobs(&workspace, State::Ready)
        + count_jobs(&workspace, State::Processing)
        + count_jobs(&workspace, State::Output)
        + count_jobs(&workspace, State::Failed);
    assert_eq!(total, 6, "no job may vanish across shutdown");
    assert_eq!(count_jobs(&workspace, State::Processing), 0, "current job drains");
    let _ = fs::remove_dir_all(&root);
}
