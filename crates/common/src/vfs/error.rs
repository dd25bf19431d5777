use crate::acl::{Permission, PrincipalId};
use crate::share::GrantToken;

use super::node::NodeId;
use super::path::VfsPath;

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("path not found: {0}")]
    PathNotFound(VfsPath),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a file: {0}")]
    NotAFile(NodeId),
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("an entry named {name:?} already exists in {parent}")]
    NameConflict { parent: NodeId, name: String },
    #[error("cannot move {node} into its own subtree at {destination}")]
    CyclicMove { node: NodeId, destination: NodeId },
    #[error("cannot move {node} into another principal's tree")]
    CrossRootMove { node: NodeId },
    #[error("root folder {0} cannot be moved, renamed or deleted")]
    RootImmutable(NodeId),
    #[error("root folder already exists for {0}")]
    RootAlreadyExists(PrincipalId),
    #[error("{principal} lacks {required} permission on {node}")]
    InsufficientPermission {
        principal: PrincipalId,
        node: NodeId,
        required: Permission,
    },
    #[error("{principal} is not allowed to manage grant {}..", .token.short())]
    NotOwner {
        principal: PrincipalId,
        token: GrantToken,
    },
    #[error("share grant is unavailable")]
    GrantUnavailable,
    #[error("invalid grant: {0}")]
    InvalidGrant(&'static str),
    #[error("operation cancelled")]
    Cancelled,
    #[error("transaction timed out")]
    Timeout,
    #[error("content store error: {0}")]
    Content(anyhow::Error),
    #[error("tree store error: {0}")]
    Store(anyhow::Error),
    #[error("corrupt tree: {0}")]
    Corrupt(String),
}
