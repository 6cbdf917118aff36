//! Vision jobs: per-worker projectors, globally serialized encoding.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use nrvna_core::config::LimitsConfig;
use nrvna_core::{Retriever, Status, Submitter};
use nrvna_runtime::engine::EchoEngine;

use crate::{start_server, temp_root, wait_for};

fn write_mmproj(root: &std::path::Path) -> PathBuf {
    let path = root.join("mmproj.bin");
    fs::write(&path, b"projector").unwrap();
    path
}

fn write_image(root: &std::path::Path, name: &str) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, b"fake image bytes").unwrap();
    path
}

/// Four concurrent vision jobs on four workers: encodes never overlap (the
/// global vision mutex), yet all four jobs complete.
#[test]
fn concurrent_vision_encodes_are_serialized() {
    let root = temp_root("vision");
    // A long enough encode that overlap would be caught.
    let engine = EchoEngine::new().with_encode_delay(Duration::from_millis(60));

    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let ids: Vec<_> = (0..4)
        .map(|i| {
            let image = write_image(&root, &format!("photo_{i}.png"));
            submitter
                .submit_with_images(&format!("describe picture {i}"), &[image])
                .unwrap()
        })
        .collect();

    let mmproj = write_mmproj(&root);
    let mut server = start_server(&root, &engine, 4, Some(mmproj));

    let retriever = Retriever::new(&root);
    assert!(
        wait_for(Duration::from_secs(15), || ids
            .iter()
            .all(|id| retriever.status(id).is_terminal())),
        "vision jobs never completed"
    );
    server.shutdown();

    assert_eq!(engine.total_encodes(), 4);
    assert_eq!(
        engine.peak_concurrent_encodes(),
        1,
        "vision encoding must be serialized across workers"
    );

    for (i, id) in ids.iter().enumerate() {
        let job = retriever.get(id).unwrap();
        assert_eq!(job.status, Status::Done, "job {id}");
        assert!(job.content.contains("[image_0:"), "{}", job.content);
        assert!(
            job.content.contains(&format!("describe picture {i}")),
            "{}",
            job.content
        );
    }
    let _ = fs::remove_dir_all(&root);
}

/// A vision job whose staged image disappears before processing fails
/// cleanly instead of wedging the pipeline.
#[test]
fn vision_job_with_vanished_image_fails() {
    let root = temp_root("vanished");
    let engine = EchoEngine::new();

    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let image = write_image(&root, "ephemeral.png");
    let id = submitter.submit_with_images("describe", &[image.clone()]).unwrap();

    // The attachment must be a symlink for the deletion below to break it;
    // on filesystems where staging fell back to a copy there is nothing to
    // test here.
    let staged = nrvna_core::Workspace::new(&root)
        .job_dir(nrvna_core::State::Ready, &id)
        .join("images")
        .join("image_0.png");
    let is_link = fs::symlink_metadata(&staged)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link {
        eprintln!("SKIP: image staging used a copy, symlink lifetime not observable");
        let _ = fs::remove_dir_all(&root);
        return;
    }

    // Deleting the source breaks the job but must not break the daemon.
    fs::remove_file(&image).unwrap();

    let mmproj = write_mmproj(&root);
    let mut server = start_server(&root, &engine, 1, Some(mmproj));

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || retriever
        .status(&id)
        .is_terminal()));
    assert_eq!(retriever.status(&id), Status::Failed);
    assert!(retriever.error(&id).unwrap().contains("Failed to load image"));

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

/// Text jobs still flow while a vision-capable daemon is running.
#[test]
fn text_and_vision_jobs_coexist() {
    let root = temp_root("mixed");
    let engine = EchoEngine::new().with_encode_delay(Duration::from_millis(30));

    let submitter = Submitter::open(&root, &LimitsConfig::default()).unwrap();
    let image = write_image(&root, "scene.jpg");
    let vision_id = submitter
        .submit_with_images("what do you see", &[image])
        .unwrap();
    let text_id = submitter
        .submit("plain text job", nrvna_core::JobType::Text)
        .unwrap();

    let mmproj = write_mmproj(&root);
    let mut server = start_server(&root, &engine, 2, Some(mmproj));

    let retriever = Retriever::new(&root);
    assert!(wait_for(Duration::from_secs(10), || {
        retriever.status(&vision_id).is_terminal() && retriever.status(&text_id).is_terminal()
    }));

    assert_eq!(retriever.get(&text_id).unwrap().content, "plain text job");
    assert_eq!(retriever.get(&vision_id).unwrap().status, Status::Done);

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}
