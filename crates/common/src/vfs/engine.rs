use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::acl::{self, Permission, PrincipalId};

use super::content::{ContentStore, MemoryContentStore};
use super::error::VfsError;
use super::node::{FileContent, Node, NodeId, NodeKind};
use super::path::VfsPath;
use super::store::{EphemeralStore, TreeStore};
use super::tree::Tree;
use super::txn::Transaction;

pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct VfsConfig {
    /// How long a transaction may wait for the writer lock.
    pub transaction_timeout: Duration,
    /// Whether principals holding a grant may issue grants of their own.
    pub allow_reshare: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            allow_reshare: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Replace the content of an existing file at the target path.
    pub overwrite: bool,
}

impl UploadOptions {
    pub fn overwrite() -> Self {
        Self { overwrite: true }
    }
}

struct VfsInner {
    current: RwLock<Arc<Tree>>,
    writer: Arc<Mutex<()>>,
    store: Arc<dyn TreeStore>,
    content: Arc<dyn ContentStore>,
    config: VfsConfig,
}

/// Handle to the filesystem. Cheap to clone.
///
/// Readers work on an immutable snapshot and never wait on writers. Writers
/// are serialised; each mutation runs as one transaction that is persisted
/// through the [`TreeStore`] before it becomes visible.
#[derive(Clone)]
pub struct Vfs(Arc<VfsInner>);

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("nodes", &self.snapshot().len())
            .field("config", &self.0.config)
            .finish()
    }
}

fn root_in(tree: &Tree, owner: &PrincipalId) -> Result<NodeId, VfsError> {
    tree.root_of(owner)
        .copied()
        .ok_or_else(|| VfsError::PathNotFound(VfsPath::root()))
}

impl Vfs {
    /// Load the persisted tree and start serving it.
    pub async fn open(
        config: VfsConfig,
        store: Arc<dyn TreeStore>,
        content: Arc<dyn ContentStore>,
    ) -> Result<Self, VfsError> {
        let (nodes, grants) = store.load().await.map_err(VfsError::Store)?;
        let tree = Tree::from_parts(nodes, grants)?;
        tracing::info!(
            nodes = tree.len(),
            grants = tree.indexed_grant_count(),
            "vfs loaded"
        );
        Ok(Self::from_tree(config, tree, store, content))
    }

    pub fn in_memory() -> Self {
        Self::in_memory_with_config(VfsConfig::default())
    }

    pub fn in_memory_with_config(config: VfsConfig) -> Self {
        Self::from_tree(
            config,
            Tree::new(),
            Arc::new(EphemeralStore),
            Arc::new(MemoryContentStore::new()),
        )
    }

    fn from_tree(
        config: VfsConfig,
        tree: Tree,
        store: Arc<dyn TreeStore>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Vfs(Arc::new(VfsInner {
            current: RwLock::new(Arc::new(tree)),
            writer: Arc::new(Mutex::new(())),
            store,
            content,
            config,
        }))
    }

    pub fn config(&self) -> &VfsConfig {
        &self.0.config
    }

    pub fn content_store(&self) -> Arc<dyn ContentStore> {
        self.0.content.clone()
    }

    /// The latest committed tree.
    pub fn snapshot(&self) -> Arc<Tree> {
        self.0.current.read().clone()
    }

    /// Run `f` against a private copy of the tree and publish the result.
    ///
    /// An error from `f` or from the store discards the copy, so nothing
    /// partial is ever persisted or observed. The timeout bounds the wait
    /// for the writer lock. Once a changeset goes to the store the commit
    /// runs to completion and is published, even if the caller goes away,
    /// so the live tree never falls behind what was persisted.
    pub(crate) async fn transact<T, F>(&self, f: F) -> Result<T, VfsError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, VfsError> + Send,
        T: Send,
    {
        let limit = self.0.config.transaction_timeout;
        let writer = match tokio::time::timeout(limit, self.0.writer.clone().lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("transaction abandoned after {:?} waiting for the writer", limit);
                return Err(VfsError::Timeout);
            }
        };

        let base = self.snapshot();
        let mut txn = Transaction::new(Tree::clone(&base), Utc::now());
        let output = f(&mut txn)?;
        let (tree, changes) = txn.finish();

        if changes.is_empty() {
            *self.0.current.write() = Arc::new(tree);
            return Ok(output);
        }

        let vfs = self.clone();
        let commit = tokio::spawn(async move {
            let _writer = writer;
            vfs.0.store.commit(&changes).await.map_err(VfsError::Store)?;
            *vfs.0.current.write() = Arc::new(tree);
            Ok::<_, VfsError>(())
        });
        commit
            .await
            .map_err(|e| VfsError::Store(anyhow::anyhow!("commit task failed: {}", e)))??;
        Ok(output)
    }

    /// Create the root folder for `owner`.
    pub async fn create_root(&self, owner: &PrincipalId) -> Result<NodeId, VfsError> {
        let id = self
            .transact(|txn| txn.create_root(owner.clone()))
            .await?;
        tracing::info!(owner = %owner, root = %id, "created root folder");
        Ok(id)
    }

    /// Like [`Vfs::create_root`], but returns the existing root if there is one.
    pub async fn ensure_root(&self, owner: &PrincipalId) -> Result<NodeId, VfsError> {
        if let Some(root) = self.snapshot().root_of(owner) {
            return Ok(*root);
        }
        match self.create_root(owner).await {
            Err(VfsError::RootAlreadyExists(_)) => self.root_of(owner),
            result => result,
        }
    }

    pub fn root_of(&self, owner: &PrincipalId) -> Result<NodeId, VfsError> {
        root_in(&self.snapshot(), owner)
    }

    /// Resolve `path` inside `owner`'s tree. This is a structural lookup;
    /// callers still have to authorize against the returned node.
    pub fn resolve(&self, owner: &PrincipalId, path: &VfsPath) -> Result<Node, VfsError> {
        let tree = self.snapshot();
        let root = root_in(&tree, owner)?;
        tree.resolve(&root, path).cloned()
    }

    pub fn path_of(&self, node: &NodeId) -> Result<VfsPath, VfsError> {
        self.snapshot().path_of(node)
    }

    pub fn effective_permission(&self, actor: &PrincipalId, node: &NodeId) -> Permission {
        acl::effective_permission(&self.snapshot(), actor, node, Utc::now())
    }

    /// May `actor` do something needing `required` on `node`? Unknown nodes
    /// are never authorized.
    pub fn authorize(&self, actor: &PrincipalId, node: &NodeId, required: Permission) -> bool {
        let tree = self.snapshot();
        tree.contains(node)
            && acl::effective_permission(&tree, actor, node, Utc::now()).allows(required)
    }

    pub fn stat(&self, actor: &PrincipalId, node: &NodeId) -> Result<Node, VfsError> {
        let tree = self.snapshot();
        acl::require(&tree, actor, node, Permission::Read, Utc::now())?;
        tree.node(node).cloned()
    }

    /// Children of a folder, in name order.
    pub fn list(&self, actor: &PrincipalId, folder: &NodeId) -> Result<Vec<Node>, VfsError> {
        let tree = self.snapshot();
        acl::require(&tree, actor, folder, Permission::Read, Utc::now())?;
        if !tree.node(folder)?.is_folder() {
            return Err(VfsError::NotADirectory(folder.to_string()));
        }
        Ok(tree.children(folder).cloned().collect())
    }

    pub async fn read_file(&self, actor: &PrincipalId, file: &NodeId) -> Result<Bytes, VfsError> {
        let content = {
            let tree = self.snapshot();
            acl::require(&tree, actor, file, Permission::Read, Utc::now())?;
            tree.node(file)?
                .content()
                .cloned()
                .ok_or(VfsError::NotAFile(*file))?
        };
        self.fetch(&content).await
    }

    pub(crate) async fn fetch(&self, content: &FileContent) -> Result<Bytes, VfsError> {
        self.0
            .content
            .get(&content.hash)
            .await
            .map_err(VfsError::Content)?
            .ok_or_else(|| VfsError::Content(anyhow::anyhow!("missing blob {}", content.hash)))
    }

    /// Create a folder at `path` in `owner`'s tree. With `parents`, missing
    /// ancestors are created too and an existing folder is not an error.
    pub async fn mkdir(
        &self,
        actor: &PrincipalId,
        owner: &PrincipalId,
        path: &VfsPath,
        parents: bool,
    ) -> Result<NodeId, VfsError> {
        if path.is_root() {
            return Err(VfsError::InvalidPath {
                path: path.to_string(),
                reason: "cannot create the root",
            });
        }

        let id = self
            .transact(|txn| {
                let now = txn.now();
                let root = root_in(txn.tree(), owner)?;
                let (deepest, depth) = txn.resolve_deepest(&root, path)?;
                let deepest_id = *deepest.id();
                let existing_folder = deepest.is_folder();
                let existing_parent = deepest.parent().copied().unwrap_or(root);

                acl::require(txn.tree(), actor, &deepest_id, Permission::Write, now)?;

                if depth == path.len() {
                    if parents && existing_folder {
                        return Ok(deepest_id);
                    }
                    return Err(VfsError::NameConflict {
                        parent: existing_parent,
                        name: path.file_name().unwrap_or_default().to_string(),
                    });
                }
                if !parents && depth + 1 < path.len() {
                    return Err(VfsError::PathNotFound(path.prefix(depth + 1)));
                }
                txn.resolve_or_create_intermediates(&root, path)
            })
            .await?;

        tracing::debug!(actor = %actor, owner = %owner, path = %path, "mkdir");
        Ok(id)
    }

    /// Store `data` as a file at `path`, creating missing folders.
    ///
    /// The bytes reach the content store before the transaction starts; the
    /// folder chain and file node then appear together or not at all.
    pub async fn upload(
        &self,
        actor: &PrincipalId,
        owner: &PrincipalId,
        path: &VfsPath,
        data: Bytes,
        options: UploadOptions,
    ) -> Result<NodeId, VfsError> {
        let name = path
            .file_name()
            .ok_or_else(|| VfsError::InvalidPath {
                path: path.to_string(),
                reason: "upload target has no file name",
            })?
            .to_string();
        let parent_path = path.parent().unwrap_or_default();

        let size = data.len() as u64;
        let hash = self.0.content.put(data).await.map_err(VfsError::Content)?;
        let content = FileContent { hash, size };

        let id = self
            .transact(move |txn| {
                let now = txn.now();
                let root = root_in(txn.tree(), owner)?;
                let (deepest, depth) = txn.resolve_deepest(&root, path)?;
                let deepest_id = *deepest.id();

                if depth == path.len() {
                    let is_folder = deepest.is_folder();
                    let parent = deepest.parent().copied().unwrap_or(root);
                    acl::require(txn.tree(), actor, &deepest_id, Permission::Write, now)?;
                    if is_folder || !options.overwrite {
                        return Err(VfsError::NameConflict { parent, name });
                    }
                    txn.set_content(&deepest_id, content)?;
                    return Ok(deepest_id);
                }

                acl::require(txn.tree(), actor, &deepest_id, Permission::Write, now)?;
                let parent = txn.resolve_or_create_intermediates(&root, &parent_path)?;
                txn.create_child(&parent, &name, NodeKind::File, Some(content))
            })
            .await?;

        tracing::debug!(actor = %actor, owner = %owner, path = %path, size, "upload");
        Ok(id)
    }

    /// Move `node` under `new_parent`, optionally renaming it on the way.
    pub async fn move_node(
        &self,
        actor: &PrincipalId,
        node: &NodeId,
        new_parent: &NodeId,
        new_name: Option<&str>,
    ) -> Result<(), VfsError> {
        self.transact(|txn| {
            let now = txn.now();
            let current = txn.node(node)?;
            if current.is_root() {
                return Err(VfsError::RootImmutable(*node));
            }
            let name = new_name.unwrap_or(current.name()).to_string();
            acl::require(txn.tree(), actor, node, Permission::Write, now)?;
            acl::require(txn.tree(), actor, new_parent, Permission::Write, now)?;
            txn.relink(node, new_parent, &name)
        })
        .await?;

        tracing::debug!(actor = %actor, node = %node, new_parent = %new_parent, "move");
        Ok(())
    }

    pub async fn rename(
        &self,
        actor: &PrincipalId,
        node: &NodeId,
        new_name: &str,
    ) -> Result<(), VfsError> {
        self.transact(|txn| {
            let now = txn.now();
            let parent = *txn
                .node(node)?
                .parent()
                .ok_or(VfsError::RootImmutable(*node))?;
            acl::require(txn.tree(), actor, node, Permission::Write, now)?;
            acl::require(txn.tree(), actor, &parent, Permission::Write, now)?;
            txn.relink(node, &parent, new_name)
        })
        .await?;

        tracing::debug!(actor = %actor, node = %node, new_name, "rename");
        Ok(())
    }

    /// Delete `node` and everything under it. Returns how many nodes went.
    pub async fn delete(&self, actor: &PrincipalId, node: &NodeId) -> Result<usize, VfsError> {
        let removed = self
            .transact(|txn| {
                let now = txn.now();
                if txn.node(node)?.is_root() {
                    return Err(VfsError::RootImmutable(*node));
                }
                acl::require(txn.tree(), actor, node, Permission::Write, now)?;
                txn.remove_subtree(node)
            })
            .await?;

        tracing::info!(actor = %actor, node = %node, removed = removed.len(), "deleted subtree");
        Ok(removed.len())
    }

    /// Move every source under `destination` in a single transaction.
    pub async fn move_many(
        &self,
        actor: &PrincipalId,
        sources: &[NodeId],
        destination: &NodeId,
        cancel: &AtomicBool,
    ) -> Result<Vec<NodeId>, VfsError> {
        self.transact(|txn| {
            let now = txn.now();
            acl::require(txn.tree(), actor, destination, Permission::Write, now)?;
            for source in sources {
                if cancel.load(Ordering::Acquire) {
                    return Err(VfsError::Cancelled);
                }
                let name = txn.node(source)?.name().to_string();
                if txn.node(source)?.is_root() {
                    return Err(VfsError::RootImmutable(*source));
                }
                acl::require(txn.tree(), actor, source, Permission::Write, now)?;
                txn.relink(source, destination, &name)?;
            }
            Ok(sources.to_vec())
        })
        .await
    }

    /// Deep copy every source under `destination` in a single transaction.
    /// Copies belong to the destination's owner.
    pub async fn copy_many(
        &self,
        actor: &PrincipalId,
        sources: &[NodeId],
        destination: &NodeId,
        cancel: &AtomicBool,
    ) -> Result<Vec<NodeId>, VfsError> {
        self.transact(|txn| {
            let now = txn.now();
            acl::require(txn.tree(), actor, destination, Permission::Write, now)?;
            let mut copies = Vec::with_capacity(sources.len());
            for source in sources {
                acl::require(txn.tree(), actor, source, Permission::Read, now)?;
                let name = txn.node(source)?.name().to_string();
                copies.push(txn.copy_subtree(source, destination, &name, cancel)?);
            }
            Ok(copies)
        })
        .await
    }
}
