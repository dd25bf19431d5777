use chrono::{DateTime, Utc};
use im::{HashMap, OrdMap, OrdSet};

use crate::acl::PrincipalId;
use crate::share::{GrantToken, ShareGrant};

use super::error::VfsError;
use super::node::{validate_name, FileContent, Node, NodeId, NodeKind};

/// Arena of every principal's nodes plus the share grants hanging off them.
///
/// A `Tree` is an immutable snapshot as far as readers are concerned; the
/// engine clones it, edits the clone inside a transaction and publishes the
/// result in one swap. The maps are persistent, so a clone shares all of its
/// structure with the original and an edit copies only the paths it touches.
/// A transaction costs what it changes, not the size of the whole tree.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, OrdMap<String, NodeId>>,
    roots: HashMap<PrincipalId, NodeId>,
    grants: HashMap<GrantToken, ShareGrant>,
    // unrevoked grants whose anchor still exists
    anchored: HashMap<NodeId, OrdSet<GrantToken>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree from persisted rows, checking structural invariants.
    pub fn from_parts(nodes: Vec<Node>, grants: Vec<ShareGrant>) -> Result<Self, VfsError> {
        let mut tree = Tree::new();

        for node in nodes {
            if tree.nodes.contains_key(node.id()) {
                return Err(VfsError::Corrupt(format!("duplicate node {}", node.id())));
            }
            tree.nodes.insert(*node.id(), node);
        }

        for node in tree.nodes.values() {
            match node.parent() {
                None => {
                    if tree.roots.insert(node.owner().clone(), *node.id()).is_some() {
                        return Err(VfsError::Corrupt(format!(
                            "multiple roots for {}",
                            node.owner()
                        )));
                    }
                }
                Some(parent_id) => {
                    let parent = tree.nodes.get(parent_id).ok_or_else(|| {
                        VfsError::Corrupt(format!("{} has missing parent {}", node.id(), parent_id))
                    })?;
                    if !parent.is_folder() {
                        return Err(VfsError::Corrupt(format!(
                            "{} has a file as parent",
                            node.id()
                        )));
                    }
                    if parent.owner() != node.owner() {
                        return Err(VfsError::Corrupt(format!(
                            "{} is not owned by its root's owner",
                            node.id()
                        )));
                    }
                    let siblings = tree
                        .children
                        .entry(*parent_id)
                        .or_insert_with(OrdMap::new);
                    if siblings.insert(node.name().to_string(), *node.id()).is_some() {
                        return Err(VfsError::Corrupt(format!(
                            "duplicate name {:?} under {}",
                            node.name(),
                            parent_id
                        )));
                    }
                }
            }
        }

        for id in tree.nodes.keys() {
            let reaches_root = tree
                .lineage(id)
                .last()
                .is_some_and(|top| top.is_root());
            if !reaches_root {
                return Err(VfsError::Corrupt(format!("{} is not reachable from a root", id)));
            }
        }

        for grant in grants {
            tree.upsert_grant(grant);
        }

        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &NodeId) -> Result<&Node, VfsError> {
        self.nodes.get(id).ok_or(VfsError::NodeNotFound(*id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn root_of(&self, owner: &PrincipalId) -> Option<&NodeId> {
        self.roots.get(owner)
    }

    pub fn child(&self, parent: &NodeId, name: &str) -> Option<&Node> {
        self.children
            .get(parent)
            .and_then(|names| names.get(name))
            .and_then(|id| self.nodes.get(id))
    }

    /// Children of `parent` in name order.
    pub fn children(&self, parent: &NodeId) -> impl Iterator<Item = &Node> {
        self.children
            .get(parent)
            .into_iter()
            .flat_map(|names| names.values())
            .filter_map(|id| self.nodes.get(id))
    }

    pub fn has_children(&self, parent: &NodeId) -> bool {
        self.children
            .get(parent)
            .is_some_and(|names| !names.is_empty())
    }

    /// Walk from `id` up to its root, `id` first.
    pub fn lineage(&self, id: &NodeId) -> Lineage<'_> {
        Lineage {
            tree: self,
            next: Some(*id),
            remaining: self.nodes.len(),
        }
    }

    pub fn is_same_or_descendant(&self, id: &NodeId, ancestor: &NodeId) -> bool {
        self.lineage(id).any(|node| node.id() == ancestor)
    }

    /// `id` and every node below it, parents before children.
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.nodes.contains_key(id) {
            return out;
        }
        let mut stack = vec![*id];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(names) = self.children.get(&next) {
                // reversed so siblings come out in name order
                let mut below: Vec<NodeId> = names.values().copied().collect();
                below.reverse();
                stack.extend(below);
            }
        }
        out
    }

    pub fn grant(&self, token: &GrantToken) -> Option<&ShareGrant> {
        self.grants.get(token)
    }

    pub fn grants(&self) -> impl Iterator<Item = &ShareGrant> {
        self.grants.values()
    }

    /// Every grant record anchored at `id`, usable or not.
    pub fn grants_anchored_at<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a ShareGrant> {
        self.grants.values().filter(move |grant| grant.anchor() == id)
    }

    /// Indexed grants on `id`. May still contain expired grants until the
    /// next sweep, so callers check [`ShareGrant::is_active`].
    pub fn active_grants(&self, id: &NodeId) -> impl Iterator<Item = &ShareGrant> {
        self.anchored
            .get(id)
            .into_iter()
            .flat_map(|tokens| tokens.iter())
            .filter_map(|token| self.grants.get(token))
    }

    pub fn indexed_grant_count(&self) -> usize {
        self.anchored.values().map(|tokens| tokens.len()).sum()
    }

    pub(crate) fn insert_root(
        &mut self,
        owner: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<NodeId, VfsError> {
        if self.roots.contains_key(&owner) {
            return Err(VfsError::RootAlreadyExists(owner));
        }
        let root = Node::root(owner.clone(), now);
        let id = *root.id();
        self.roots.insert(owner, id);
        self.nodes.insert(id, root);
        Ok(id)
    }

    pub(crate) fn insert_child(
        &mut self,
        parent: &NodeId,
        name: &str,
        kind: NodeKind,
        content: Option<FileContent>,
        now: DateTime<Utc>,
    ) -> Result<NodeId, VfsError> {
        validate_name(name)?;
        let parent_node = self.node(parent)?;
        if !parent_node.is_folder() {
            return Err(VfsError::NotADirectory(parent.to_string()));
        }
        if self.child(parent, name).is_some() {
            return Err(VfsError::NameConflict {
                parent: *parent,
                name: name.to_string(),
            });
        }

        let owner = parent_node.owner().clone();
        let node = Node::child(*parent, name.to_string(), kind, owner, content, now);
        let id = *node.id();
        self.nodes.insert(id, node);
        self.children
            .entry(*parent)
            .or_insert_with(OrdMap::new)
            .insert(name.to_string(), id);
        self.touch(parent, now);
        Ok(id)
    }

    pub(crate) fn relink(
        &mut self,
        id: &NodeId,
        new_parent: &NodeId,
        new_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VfsError> {
        validate_name(new_name)?;
        let node = self.node(id)?;
        let old_parent = *node.parent().ok_or(VfsError::RootImmutable(*id))?;
        let old_name = node.name().to_string();
        let owner = node.owner().clone();

        let destination = self.node(new_parent)?;
        if !destination.is_folder() {
            return Err(VfsError::NotADirectory(new_parent.to_string()));
        }
        if destination.owner() != &owner {
            return Err(VfsError::CrossRootMove { node: *id });
        }
        if self.is_same_or_descendant(new_parent, id) {
            return Err(VfsError::CyclicMove {
                node: *id,
                destination: *new_parent,
            });
        }
        if let Some(existing) = self.child(new_parent, new_name) {
            if existing.id() == id {
                return Ok(());
            }
            return Err(VfsError::NameConflict {
                parent: *new_parent,
                name: new_name.to_string(),
            });
        }

        if let Some(names) = self.children.get_mut(&old_parent) {
            names.remove(&old_name);
        }
        self.children
            .entry(*new_parent)
            .or_insert_with(OrdMap::new)
            .insert(new_name.to_string(), *id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.relink(*new_parent, new_name.to_string(), now);
        }
        self.touch(&old_parent, now);
        self.touch(new_parent, now);
        Ok(())
    }

    /// Remove `id` and its whole subtree, returning the removed ids.
    pub(crate) fn remove_subtree(
        &mut self,
        id: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeId>, VfsError> {
        let node = self.node(id)?;
        let parent = *node.parent().ok_or(VfsError::RootImmutable(*id))?;
        let name = node.name().to_string();

        let removed = self.descendants(id);
        for gone in &removed {
            self.nodes.remove(gone);
            self.children.remove(gone);
            // records stay for auditing, they just stop applying
            self.anchored.remove(gone);
        }
        if let Some(names) = self.children.get_mut(&parent) {
            names.remove(&name);
        }
        self.touch(&parent, now);
        Ok(removed)
    }

    pub(crate) fn set_content(
        &mut self,
        id: &NodeId,
        content: FileContent,
        now: DateTime<Utc>,
    ) -> Result<(), VfsError> {
        let node = self.nodes.get_mut(id).ok_or(VfsError::NodeNotFound(*id))?;
        if !node.is_file() {
            return Err(VfsError::NotAFile(*id));
        }
        node.set_content(content, now);
        Ok(())
    }

    /// Store a grant record, indexing it if it can still apply.
    pub(crate) fn upsert_grant(&mut self, grant: ShareGrant) {
        let token = grant.token().clone();
        let anchor = *grant.anchor();
        let indexable = !grant.is_revoked() && self.nodes.contains_key(&anchor);
        self.grants.insert(token.clone(), grant);
        if indexable {
            self.anchored
                .entry(anchor)
                .or_insert_with(OrdSet::new)
                .insert(token);
        } else {
            self.unindex_grant(&token);
        }
    }

    pub(crate) fn grant_mut(&mut self, token: &GrantToken) -> Option<&mut ShareGrant> {
        self.grants.get_mut(token)
    }

    /// Drop a grant from the active index. The record is kept.
    pub(crate) fn unindex_grant(&mut self, token: &GrantToken) -> bool {
        let Some(anchor) = self.grants.get(token).map(|grant| *grant.anchor()) else {
            return false;
        };
        let Some(tokens) = self.anchored.get_mut(&anchor) else {
            return false;
        };
        let removed = tokens.remove(token).is_some();
        if tokens.is_empty() {
            self.anchored.remove(&anchor);
        }
        removed
    }

    /// Indexed grants that are expired at `now`.
    pub(crate) fn expired_indexed(&self, now: DateTime<Utc>) -> Vec<GrantToken> {
        self.anchored
            .values()
            .flat_map(|tokens| tokens.iter())
            .filter(|token| {
                self.grants
                    .get(*token)
                    .is_some_and(|grant| grant.is_expired(now))
            })
            .cloned()
            .collect()
    }

    fn touch(&mut self, id: &NodeId, now: DateTime<Utc>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.touch(now);
        }
    }
}

/// Iterator over a node and its ancestors. Bounded by the tree size so a
/// corrupt parent chain cannot loop forever.
pub struct Lineage<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
    remaining: usize,
}

impl<'a> Iterator for Lineage<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let node = self.tree.nodes.get(&self.next?)?;
        self.next = node.parent().copied();
        Some(node)
    }
}
