//! Integration tests for the background job dispatcher and worker

mod common;

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use ::common::acl::Permission;
use ::common::jobs::{
    run_worker, Job, JobDispatcher, JobError, JobOutput, JobReceiver, JobStatus,
};
use ::common::share::GrantSpec;
use ::common::vfs::{EphemeralStore, Vfs, VfsConfig};

struct Worker {
    dispatcher: JobDispatcher,
    shutdown: watch::Sender<()>,
    handle: JoinHandle<()>,
}

fn start_worker(vfs: &Vfs, dispatcher: JobDispatcher, receiver: JobReceiver) -> Worker {
    let (shutdown, shutdown_rx) = watch::channel(());
    let handle = tokio::spawn(run_worker(
        vfs.clone(),
        dispatcher.clone(),
        receiver,
        2,
        shutdown_rx,
    ));
    Worker {
        dispatcher,
        shutdown,
        handle,
    }
}

fn spawn_worker(vfs: &Vfs) -> Worker {
    let (dispatcher, receiver) = JobDispatcher::new(None);
    start_worker(vfs, dispatcher, receiver)
}

impl Worker {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_bulk_move() {
    let env = common::setup_test_env().await;
    let a = common::put(&env, &env.alice, "/inbox/a.txt", b"a").await;
    let b = common::put(&env, &env.alice, "/inbox/b.txt", b"b").await;
    let dest = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/sorted"), false)
        .await
        .unwrap();
    let worker = spawn_worker(&env.vfs);

    let pending = worker
        .dispatcher
        .enqueue(Job::BulkMove {
            actor: env.alice.clone(),
            sources: vec![a, b],
            destination: dest,
        })
        .unwrap();
    assert_eq!(pending.status, JobStatus::Queued);
    assert_eq!(pending.targets, vec![a, b, dest]);

    let done = worker.dispatcher.wait(&pending.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.output, Some(JobOutput::Moved(vec![a, b])));
    assert!(done.finished_at.is_some());
    assert_eq!(
        env.vfs.path_of(&a).unwrap().to_string(),
        "/sorted/a.txt"
    );

    worker.stop().await;
}

#[tokio::test]
async fn test_bulk_copy_into_shared_folder() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/src/doc.txt", b"contents").await;
    let src = common::resolve(&env, &env.alice, "/src");
    let drop_box = env
        .vfs
        .mkdir(&env.bob, &env.bob, &common::path("/dropbox"), false)
        .await
        .unwrap();
    env.vfs
        .shares()
        .issue(
            &env.bob,
            &drop_box,
            GrantSpec::for_principal(env.alice.clone(), Permission::Write),
        )
        .await
        .unwrap();
    let worker = spawn_worker(&env.vfs);

    let pending = worker
        .dispatcher
        .enqueue(Job::BulkCopy {
            actor: env.alice.clone(),
            sources: vec![*src.id()],
            destination: drop_box,
        })
        .unwrap();
    let done = worker.dispatcher.wait(&pending.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done, "{:?}", done.error);

    // original untouched, copy owned by bob with the same bytes
    assert!(env.vfs.stat(&env.alice, &file).is_ok());
    let copy = common::resolve(&env, &env.bob, "/dropbox/src/doc.txt");
    assert_eq!(copy.owner(), &env.bob);
    assert_ne!(copy.id(), &file);
    let data = env.vfs.read_file(&env.bob, copy.id()).await.unwrap();
    assert_eq!(data, "contents");

    worker.stop().await;
}

#[tokio::test]
async fn test_archive_build() {
    let env = common::setup_test_env().await;
    common::put(&env, &env.alice, "/photos/a.jpg", b"aaa").await;
    common::put(&env, &env.alice, "/photos/trip/b.jpg", b"bbb").await;
    env.vfs
        .mkdir(&env.alice, &env.alice, &common::path("/photos/empty"), false)
        .await
        .unwrap();
    let photos = common::resolve(&env, &env.alice, "/photos");
    let worker = spawn_worker(&env.vfs);

    let pending = worker
        .dispatcher
        .enqueue(Job::ArchiveBuild {
            actor: env.alice.clone(),
            folder: *photos.id(),
        })
        .unwrap();
    let done = worker.dispatcher.wait(&pending.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done, "{:?}", done.error);

    let archive = common::resolve(&env, &env.alice, "/photos.zip");
    match done.output {
        Some(JobOutput::Archive { node, entries, .. }) => {
            assert_eq!(&node, archive.id());
            assert_eq!(entries, 3);
        }
        other => panic!("unexpected output: {other:?}"),
    }

    let bytes = env.vfs.read_file(&env.alice, archive.id()).await.unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(zip.len(), 3);

    let mut contents = String::new();
    zip.by_name("photos/trip/b.jpg")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "bbb");
    assert!(zip.by_name("photos/a.jpg").is_ok());
    assert!(zip.by_name("photos/empty/").unwrap().is_dir());

    worker.stop().await;
}

#[tokio::test]
async fn test_archive_of_same_folder_is_deduplicated() {
    let env = common::setup_test_env().await;
    let dir = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/dir"), false)
        .await
        .unwrap();
    // no worker yet, so jobs stay queued
    let (dispatcher, receiver) = JobDispatcher::new(None);

    let job = Job::ArchiveBuild {
        actor: env.alice.clone(),
        folder: dir,
    };
    let first = dispatcher.enqueue(job.clone()).unwrap();
    match dispatcher.enqueue(job.clone()) {
        Err(JobError::AlreadyQueued(id)) => assert_eq!(id, first.id),
        other => panic!("unexpected result: {other:?}"),
    }

    // once the first one is gone a new request goes through
    dispatcher.cancel(&first.id).unwrap();
    let second = dispatcher.enqueue(job).unwrap();

    let worker = start_worker(&env.vfs, dispatcher, receiver);
    let done = worker.dispatcher.wait(&second.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done, "{:?}", done.error);
    assert_eq!(
        worker.dispatcher.status(&first.id).unwrap().status,
        JobStatus::Cancelled
    );
    worker.stop().await;
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/file.txt", b"x").await;
    let dest = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/dest"), false)
        .await
        .unwrap();
    let (dispatcher, receiver) = JobDispatcher::new(None);

    let pending = dispatcher
        .enqueue(Job::BulkMove {
            actor: env.alice.clone(),
            sources: vec![file],
            destination: dest,
        })
        .unwrap();
    let fails = Arc::new(AtomicUsize::new(0));
    let counter = fails.clone();
    dispatcher
        .on_fail(&pending.id, move |record| {
            assert_eq!(record.status, JobStatus::Cancelled);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let cancelled = dispatcher.cancel(&pending.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(fails.load(Ordering::SeqCst), 1);

    // the worker sees the envelope later and must skip it
    let worker = start_worker(&env.vfs, dispatcher, receiver);
    let sweep = worker.dispatcher.enqueue(Job::GrantSweep).unwrap();
    worker.dispatcher.wait(&sweep.id).await.unwrap();
    assert_eq!(
        env.vfs.path_of(&file).unwrap().to_string(),
        "/file.txt"
    );
    assert_eq!(fails.load(Ordering::SeqCst), 1);
    worker.stop().await;
}

#[tokio::test]
async fn test_cancel_running_archive_leaves_nothing() {
    let content = common::shared(common::GatedContent::default());
    let vfs = Vfs::open(
        VfsConfig::default(),
        Arc::new(EphemeralStore),
        content.clone(),
    )
    .await
    .unwrap();
    let env = common::setup_with_vfs(vfs).await;
    common::put(&env, &env.alice, "/big/one.bin", b"1111").await;
    common::put(&env, &env.alice, "/big/two.bin", b"2222").await;
    let big = common::resolve(&env, &env.alice, "/big");
    content.gated.store(true, Ordering::SeqCst);
    let worker = spawn_worker(&env.vfs);

    let pending = worker
        .dispatcher
        .enqueue(Job::ArchiveBuild {
            actor: env.alice.clone(),
            folder: *big.id(),
        })
        .unwrap();
    common::wait_until_running(&worker.dispatcher, &pending.id).await;

    worker.dispatcher.cancel(&pending.id).unwrap();
    content.release();

    let done = worker.dispatcher.wait(&pending.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Cancelled);
    assert!(done.output.is_none());
    assert!(env
        .vfs
        .resolve(&env.alice, &common::path("/big.zip"))
        .is_err());
    worker.stop().await;
}

#[tokio::test]
async fn test_panicking_job_does_not_stop_worker() {
    let content = common::shared(common::GatedContent::default());
    let vfs = Vfs::open(
        VfsConfig::default(),
        Arc::new(EphemeralStore),
        content.clone(),
    )
    .await
    .unwrap();
    let env = common::setup_with_vfs(vfs).await;
    common::put(&env, &env.alice, "/dir/file.txt", b"x").await;
    let dir = common::resolve(&env, &env.alice, "/dir");
    content.panic_on_read.store(true, Ordering::SeqCst);
    let worker = spawn_worker(&env.vfs);

    let doomed = worker
        .dispatcher
        .enqueue(Job::ArchiveBuild {
            actor: env.alice.clone(),
            folder: *dir.id(),
        })
        .unwrap();
    let failed = worker.dispatcher.wait(&doomed.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("job panicked"));

    let next = worker.dispatcher.enqueue(Job::GrantSweep).unwrap();
    let done = worker.dispatcher.wait(&next.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.output, Some(JobOutput::Swept(0)));
    worker.stop().await;
}

#[tokio::test]
async fn test_failed_job_reports_summary() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/file.txt", b"x").await;
    let worker = spawn_worker(&env.vfs);

    // bob has no rights on alice's tree
    let pending = worker
        .dispatcher
        .enqueue(Job::BulkMove {
            actor: env.bob.clone(),
            sources: vec![file],
            destination: env.bob_root,
        })
        .unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    worker
        .dispatcher
        .on_fail(&pending.id, move |record| {
            let _ = tx.send(record.clone());
        })
        .unwrap();

    let record = rx.await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("lacks write permission"));
    assert_eq!(
        env.vfs.path_of(&file).unwrap().to_string(),
        "/file.txt"
    );
    worker.stop().await;
}

#[tokio::test]
async fn test_callbacks_after_completion_fire_immediately() {
    let env = common::setup_test_env().await;
    let worker = spawn_worker(&env.vfs);

    let pending = worker.dispatcher.enqueue(Job::GrantSweep).unwrap();
    worker.dispatcher.wait(&pending.id).await.unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let c = completions.clone();
    let f = failures.clone();
    worker
        .dispatcher
        .on_complete(&pending.id, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    worker
        .dispatcher
        .on_fail(&pending.id, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    worker.stop().await;
}

#[tokio::test]
async fn test_sweep_job_prunes_expired_grants() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/file.txt", b"x").await;
    env.vfs
        .shares()
        .issue(
            &env.alice,
            &file,
            GrantSpec::public_link(Permission::Read).expires_at(Utc::now() - Duration::seconds(1)),
        )
        .await
        .unwrap();
    let worker = spawn_worker(&env.vfs);

    let pending = worker.dispatcher.enqueue(Job::GrantSweep).unwrap();
    let done = worker.dispatcher.wait(&pending.id).await.unwrap();
    assert_eq!(done.output, Some(JobOutput::Swept(1)));
    worker.stop().await;
}

#[tokio::test]
async fn test_queue_full_and_unknown_jobs() {
    let (dispatcher, _receiver) = JobDispatcher::new(Some(1));
    dispatcher.enqueue(Job::GrantSweep).unwrap();
    assert!(matches!(
        dispatcher.enqueue(Job::GrantSweep),
        Err(JobError::QueueFull)
    ));

    let stray = ::common::jobs::JobId::new();
    assert!(matches!(
        dispatcher.status(&stray),
        Err(JobError::UnknownJob(_))
    ));
    assert!(matches!(
        dispatcher.cancel(&stray),
        Err(JobError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn test_closed_queue() {
    let (dispatcher, receiver) = JobDispatcher::new(None);
    drop(receiver);
    assert!(matches!(
        dispatcher.enqueue(Job::GrantSweep),
        Err(JobError::QueueClosed)
    ));
}

#[tokio::test]
async fn test_shutdown_cancels_queued_jobs() {
    let vfs = Vfs::in_memory();
    let (dispatcher, receiver) = JobDispatcher::new(None);
    let first = dispatcher.enqueue(Job::GrantSweep).unwrap();
    let second = dispatcher.enqueue(Job::GrantSweep).unwrap();

    // shutdown is already pending when the worker starts
    let (shutdown, shutdown_rx) = watch::channel(());
    shutdown.send(()).unwrap();
    run_worker(vfs, dispatcher.clone(), receiver, 2, shutdown_rx).await;

    for pending in [first, second] {
        let record = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            dispatcher.wait(&pending.id),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.finished_at.is_some());
    }

    assert!(matches!(
        dispatcher.enqueue(Job::GrantSweep),
        Err(JobError::QueueClosed)
    ));
}
