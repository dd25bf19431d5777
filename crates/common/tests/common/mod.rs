//! Shared test utilities for vfs integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use common::acl::PrincipalId;
use common::jobs::{JobDispatcher, JobId, JobStatus};
use common::share::ShareGrant;
use common::vfs::{
    Changeset, ContentHash, ContentStore, MemoryContentStore, Node, NodeId, TreeStore,
    UploadOptions, Vfs, VfsPath,
};

pub struct TestEnv {
    pub vfs: Vfs,
    pub alice: PrincipalId,
    pub bob: PrincipalId,
    pub alice_root: NodeId,
    pub bob_root: NodeId,
}

/// Set up an in-memory vfs with two principals, each with a root folder
pub async fn setup_test_env() -> TestEnv {
    setup_with_vfs(Vfs::in_memory()).await
}

pub async fn setup_with_vfs(vfs: Vfs) -> TestEnv {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let alice = PrincipalId::new("alice");
    let bob = PrincipalId::new("bob");
    let alice_root = vfs.create_root(&alice).await.unwrap();
    let bob_root = vfs.create_root(&bob).await.unwrap();
    TestEnv {
        vfs,
        alice,
        bob,
        alice_root,
        bob_root,
    }
}

pub fn path(p: &str) -> VfsPath {
    VfsPath::parse(p).unwrap()
}

/// Upload as the owner of the tree
pub async fn put(env: &TestEnv, owner: &PrincipalId, p: &str, data: &[u8]) -> NodeId {
    env.vfs
        .upload(
            owner,
            owner,
            &path(p),
            Bytes::copy_from_slice(data),
            UploadOptions::default(),
        )
        .await
        .unwrap()
}

pub fn resolve(env: &TestEnv, owner: &PrincipalId, p: &str) -> Node {
    env.vfs.resolve(owner, &path(p)).unwrap()
}

/// Poll until a job leaves the queue
pub async fn wait_until_running(dispatcher: &JobDispatcher, id: &JobId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = dispatcher.status(id).unwrap().status;
            if status != JobStatus::Queued {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Tree store that can be told to fail commits, or to acknowledge them
/// slowly after they have been written
#[derive(Default)]
pub struct FlakyStore {
    pub fail: AtomicBool,
    pub stall: Option<Duration>,
    pub commits: AtomicUsize,
}

#[async_trait]
impl TreeStore for FlakyStore {
    async fn load(&self) -> anyhow::Result<(Vec<Node>, Vec<ShareGrant>)> {
        Ok((Vec::new(), Vec::new()))
    }

    async fn commit(&self, _changes: &Changeset) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("disk on fire");
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }
}

/// Content store whose reads block until released, or panic
#[derive(Default)]
pub struct GatedContent {
    pub inner: MemoryContentStore,
    pub gate: Notify,
    pub gated: AtomicBool,
    pub panic_on_read: AtomicBool,
}

impl GatedContent {
    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }
}

#[async_trait]
impl ContentStore for GatedContent {
    async fn put(&self, data: Bytes) -> anyhow::Result<ContentHash> {
        self.inner.put(data).await
    }

    async fn get(&self, hash: &ContentHash) -> anyhow::Result<Option<Bytes>> {
        if self.panic_on_read.load(Ordering::SeqCst) {
            panic!("content store exploded");
        }
        let notified = self.gate.notified();
        if self.gated.load(Ordering::SeqCst) {
            notified.await;
        }
        self.inner.get(hash).await
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
