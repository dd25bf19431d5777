//! Path resolution against a root.
//!
//! Resolution is purely structural; whether the caller may see the result is
//! decided afterwards against the node it lands on.

use super::error::VfsError;
use super::node::{Node, NodeId, NodeKind};
use super::path::VfsPath;
use super::tree::Tree;
use super::txn::Transaction;

impl Tree {
    /// Walk `path` down from `root`.
    pub fn resolve(&self, root: &NodeId, path: &VfsPath) -> Result<&Node, VfsError> {
        let (node, depth) = self.resolve_deepest(root, path)?;
        if depth < path.len() {
            return Err(VfsError::PathNotFound(path.prefix(depth + 1)));
        }
        Ok(node)
    }

    /// Walk as far as `path` exists, returning the deepest node reached and
    /// how many segments it consumed. A file met before the last segment is
    /// an error rather than a stopping point.
    pub fn resolve_deepest(
        &self,
        root: &NodeId,
        path: &VfsPath,
    ) -> Result<(&Node, usize), VfsError> {
        let mut current = self.node(root)?;
        for (depth, segment) in path.segments().iter().enumerate() {
            if !current.is_folder() {
                return Err(VfsError::NotADirectory(path.prefix(depth).to_string()));
            }
            match self.child(current.id(), segment) {
                Some(next) => current = next,
                None => return Ok((current, depth)),
            }
        }
        Ok((current, path.len()))
    }

    /// Path of `id` relative to its root.
    pub fn path_of(&self, id: &NodeId) -> Result<VfsPath, VfsError> {
        let mut segments: Vec<&str> = Vec::new();
        let mut reached_root = false;
        for node in self.lineage(id) {
            if node.is_root() {
                reached_root = true;
                break;
            }
            segments.push(node.name());
        }
        if !reached_root {
            return match self.contains(id) {
                true => Err(VfsError::Corrupt(format!("{} is detached from its root", id))),
                false => Err(VfsError::NodeNotFound(*id)),
            };
        }
        segments.reverse();
        VfsPath::from_segments(segments)
    }
}

impl Transaction {
    /// Resolve `path` from `root`, creating any missing folders on the way.
    /// Created folders belong to the root's owner and only become visible
    /// when the surrounding transaction commits.
    pub fn resolve_or_create_intermediates(
        &mut self,
        root: &NodeId,
        path: &VfsPath,
    ) -> Result<NodeId, VfsError> {
        let (deepest, depth) = self.resolve_deepest(root, path)?;
        if depth == path.len() && !deepest.is_folder() {
            return Err(VfsError::NotADirectory(path.to_string()));
        }

        let mut current = *deepest.id();
        for segment in &path.segments()[depth..] {
            current = self.create_child(&current, segment, NodeKind::Folder, None)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::acl::PrincipalId;

    fn setup() -> (Transaction, NodeId) {
        let mut txn = Transaction::new(Tree::new(), Utc::now());
        let root = txn.create_root(PrincipalId::new("alice")).unwrap();
        (txn, root)
    }

    #[test]
    fn test_resolve_empty_path_is_root() {
        let (txn, root) = setup();
        assert_eq!(txn.resolve(&root, &VfsPath::root()).unwrap().id(), &root);
    }

    #[test]
    fn test_resolve_reports_first_missing_segment() {
        let (mut txn, root) = setup();
        txn.resolve_or_create_intermediates(&root, &VfsPath::parse("/a").unwrap())
            .unwrap();
        let err = txn
            .resolve(&root, &VfsPath::parse("/a/b/c").unwrap())
            .unwrap_err();
        match err {
            VfsError::PathNotFound(prefix) => assert_eq!(prefix.to_string(), "/a/b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_through_file() {
        let (mut txn, root) = setup();
        txn.create_child(&root, "f.txt", NodeKind::File, None)
            .unwrap();
        let err = txn
            .resolve(&root, &VfsPath::parse("/f.txt/x").unwrap())
            .unwrap_err();
        assert!(matches!(err, VfsError::NotADirectory(_)));
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let (mut txn, root) = setup();
        txn.create_child(&root, "Docs", NodeKind::Folder, None)
            .unwrap();
        assert!(txn
            .resolve(&root, &VfsPath::parse("/docs").unwrap())
            .is_err());
    }

    #[test]
    fn test_create_intermediates_and_path_of() {
        let (mut txn, root) = setup();
        let path = VfsPath::parse("/a/b/c").unwrap();
        let leaf = txn.resolve_or_create_intermediates(&root, &path).unwrap();
        assert_eq!(txn.len(), 4);
        assert_eq!(txn.path_of(&leaf).unwrap(), path);
        assert_eq!(txn.resolve(&root, &path).unwrap().id(), &leaf);

        // idempotent once the chain exists
        let again = txn.resolve_or_create_intermediates(&root, &path).unwrap();
        assert_eq!(again, leaf);
        assert_eq!(txn.len(), 4);
    }
}
