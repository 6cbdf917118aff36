//! Crash recovery: jobs stranded in processing/ by a dead daemon.

use std::fs;
use std::time::Duration;

use nrvna_core::workspace::{State, Workspace};
use nrvna_core::{Retriever, Status};
use nrvna_runtime::engine::EchoEngine;
use nrvna_runtime::recovery::recover_orphans;

use crate::{count_jobs, start_server, temp_root, wait_for};

fn plant_orphan(workspace: &Workspace, id: &str, prompt: &str) {
    let dir = workspace.job_dir(State::Processing, id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("prompt.txt"), prompt).unwrap();
}

/// Orphans injected into processing/ are reclaimed at startup and then
/// progress to completion like any other job.
#[test]
fn orphans_are_requeued_and_complete() {
    let root = temp_root("orphans");
    let workspace = Workspace::new(&root);
    workspace.ensure_layout().unwrap();

    let ids: Vec<String> = (0..5)
        .map(|i| format!("000000000000010{i}_99_{i}"))
        .collect();
    for (i, id) in ids.iter().enumerate() {
        plant_orphan(&workspace, id, &format!("interrupted work {i}"));
    }

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 2, None);

    let retriever = Retriever::new(&root);
    assert!(
        wait_for(Duration::from_secs(10), || ids
            .iter()
            .all(|id| retriever.status(id).is_terminal())),
        "recovered jobs never completed"
    );

    for (i, id) in ids.iter().enumerate() {
        let job = retriever.get(id).unwrap();
        assert_eq!(job.status, Status::Done);
        assert_eq!(job.content, format!("interrupted work {i}"));
    }
    assert_eq!(count_jobs(&workspace, State::Processing), 0);

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// Two recovery passes in a row leave processing/ empty and everything in
/// ready/ — recovery is idempotent without a daemon in between.
#[test]
fn back_to_back_recovery_is_idempotent() {
    let root = temp_root("double");
    let workspace = Workspace::new(&root);
    workspace.ensure_layout().unwrap();

    for i in 0..3 {
        plant_orphan(&workspace, &format!("000000000000020{i}_99_0"), "stuck");
    }

    let first = recover_orphans(&workspace);
    assert_eq!(first.requeued, 3);
    let second = recover_orphans(&workspace);
    assert_eq!(second.requeued, 0);
    assert_eq!(second.abandoned, 0);

    assert_eq!(count_jobs(&workspace, State::Processing), 0);
    assert_eq!(count_jobs(&workspace, State::Ready), 3);
    let _ = fs::remove_dir_all(&root);
}

/// A daemon restarted mid-backlog picks up exactly where the previous
/// incarnation stopped; nothing is lost, nothing runs twice.
#[test]
fn restart_resumes_the_backlog() {
    let root = temp_root("restart");
    let workspace = Workspace::new(&root);
    workspace.ensure_layout().unwrap();

    // An orphan from the "crashed" daemon plus fresh queued work.
    plant_orphan(&workspace, "0000000000000300_99_0", "from before the crash");
    let ready = workspace.job_dir(State::Ready, "0000000000000301_99_0");
    fs::create_dir_all(&ready).unwrap();
    fs::write(ready.join("prompt.txt"), "queued while down").unwrap();

    let engine = EchoEngine::new();
    let mut server = start_server(&root, &engine, 1, None);

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || {
        retriever.status("0000000000000300_99_0").is_terminal()
            && retriever.status("0000000000000301_99_0").is_terminal()
    }));

    assert_eq!(
        retriever.get("0000000000000300_99_0").unwrap().content,
        "from before the crash"
    );
    assert_eq!(
        retriever.get("0000000000000301_99_0").unwrap().content,
        "queued while down"
    );

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}
