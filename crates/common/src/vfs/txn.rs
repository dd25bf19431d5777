use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::acl::PrincipalId;
use crate::share::{GrantToken, ShareGrant};

use super::error::VfsError;
use super::node::{FileContent, Node, NodeId, NodeKind};
use super::tree::Tree;

/// Everything a committed transaction changed, in the shape a
/// [`TreeStore`](super::TreeStore) needs to persist it.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Final state of every created or modified node.
    pub nodes: Vec<Node>,
    pub removed: Vec<NodeId>,
    /// Final state of every created or modified grant.
    pub grants: Vec<ShareGrant>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.removed.is_empty() && self.grants.is_empty()
    }
}

/// A private working copy of the tree.
///
/// Nothing done through a transaction is visible to anyone else until the
/// engine commits it; dropping it discards every change.
pub struct Transaction {
    tree: Tree,
    touched: BTreeSet<NodeId>,
    removed: BTreeSet<NodeId>,
    grants: BTreeSet<GrantToken>,
    now: DateTime<Utc>,
}

impl Deref for Transaction {
    type Target = Tree;

    fn deref(&self) -> &Self::Target {
        &self.tree
    }
}

impl Transaction {
    pub(crate) fn new(tree: Tree, now: DateTime<Utc>) -> Self {
        Self {
            tree,
            touched: BTreeSet::new(),
            removed: BTreeSet::new(),
            grants: BTreeSet::new(),
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn create_root(&mut self, owner: PrincipalId) -> Result<NodeId, VfsError> {
        let id = self.tree.insert_root(owner, self.now)?;
        self.touched.insert(id);
        Ok(id)
    }

    pub fn create_child(
        &mut self,
        parent: &NodeId,
        name: &str,
        kind: NodeKind,
        content: Option<FileContent>,
    ) -> Result<NodeId, VfsError> {
        let id = self
            .tree
            .insert_child(parent, name, kind, content, self.now)?;
        self.touched.insert(id);
        self.touched.insert(*parent);
        Ok(id)
    }

    pub fn relink(
        &mut self,
        id: &NodeId,
        new_parent: &NodeId,
        new_name: &str,
    ) -> Result<(), VfsError> {
        let old_parent = self.tree.node(id)?.parent().copied();
        self.tree.relink(id, new_parent, new_name, self.now)?;
        self.touched.insert(*id);
        self.touched.insert(*new_parent);
        if let Some(old_parent) = old_parent {
            self.touched.insert(old_parent);
        }
        Ok(())
    }

    pub fn remove_subtree(&mut self, id: &NodeId) -> Result<Vec<NodeId>, VfsError> {
        let parent = self.tree.node(id)?.parent().copied();
        let removed = self.tree.remove_subtree(id, self.now)?;
        self.removed.extend(removed.iter().copied());
        if let Some(parent) = parent {
            self.touched.insert(parent);
        }
        Ok(removed)
    }

    pub fn set_content(&mut self, id: &NodeId, content: FileContent) -> Result<(), VfsError> {
        self.tree.set_content(id, content, self.now)?;
        self.touched.insert(*id);
        Ok(())
    }

    pub fn put_grant(&mut self, grant: ShareGrant) {
        self.grants.insert(grant.token().clone());
        self.tree.upsert_grant(grant);
    }

    /// Edit a stored grant in place and re-index it.
    pub fn update_grant<F>(&mut self, token: &GrantToken, edit: F) -> Result<(), VfsError>
    where
        F: FnOnce(&mut ShareGrant),
    {
        let grant = self
            .tree
            .grant_mut(token)
            .ok_or(VfsError::GrantUnavailable)?;
        edit(grant);
        let grant = grant.clone();
        self.put_grant(grant);
        Ok(())
    }

    /// Drop a grant from the active index without touching its record.
    pub fn unindex_grant(&mut self, token: &GrantToken) -> bool {
        self.tree.unindex_grant(token)
    }

    /// Deep copy `source` into `destination` under `name`. File copies share
    /// content with the original. Checks `cancel` before every node.
    pub fn copy_subtree(
        &mut self,
        source: &NodeId,
        destination: &NodeId,
        name: &str,
        cancel: &AtomicBool,
    ) -> Result<NodeId, VfsError> {
        if self.tree.is_same_or_descendant(destination, source) {
            return Err(VfsError::CyclicMove {
                node: *source,
                destination: *destination,
            });
        }

        let order = self.tree.descendants(source);
        let mut mapping = std::collections::HashMap::with_capacity(order.len());
        let mut copied_root = None;

        for original in order {
            if cancel.load(Ordering::Acquire) {
                return Err(VfsError::Cancelled);
            }
            let node = self.tree.node(&original)?.clone();
            let (parent, node_name) = match copied_root {
                None => (*destination, name.to_string()),
                Some(_) => {
                    let parent = node
                        .parent()
                        .and_then(|p| mapping.get(p))
                        .copied()
                        .ok_or_else(|| {
                            VfsError::Corrupt(format!("{} copied before its parent", original))
                        })?;
                    (parent, node.name().to_string())
                }
            };
            let copy = self.create_child(&parent, &node_name, node.kind(), node.content().cloned())?;
            mapping.insert(original, copy);
            copied_root.get_or_insert(copy);
        }

        copied_root.ok_or(VfsError::NodeNotFound(*source))
    }

    pub(crate) fn finish(self) -> (Tree, Changeset) {
        let Transaction {
            tree,
            touched,
            removed,
            grants,
            ..
        } = self;

        let nodes = touched
            .iter()
            .filter_map(|id| tree.get_node(id))
            .cloned()
            .collect();
        let removed = removed
            .into_iter()
            .filter(|id| !tree.contains(id))
            .collect();
        let grants = grants
            .iter()
            .filter_map(|token| tree.grant(token))
            .cloned()
            .collect();

        (
            tree,
            Changeset {
                nodes,
                removed,
                grants,
            },
        )
    }
}
