use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::acl::PrincipalId;

use super::content::ContentHash;
use super::error::VfsError;

/// Longest allowed node name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    File,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "folder" => Some(NodeKind::Folder),
            "file" => Some(NodeKind::File),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a file's bytes live in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub hash: ContentHash,
    pub size: u64,
}

/// A single folder or file.
///
/// Identity, kind, owner and creation time never change once created. The
/// tree is the only thing allowed to touch the mutable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    name: String,
    parent: Option<NodeId>,
    owner: PrincipalId,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    content: Option<FileContent>,
}

impl Node {
    pub(crate) fn root(owner: PrincipalId, now: DateTime<Utc>) -> Self {
        Self {
            id: NodeId::new(),
            kind: NodeKind::Folder,
            name: owner.to_string(),
            parent: None,
            owner,
            created_at: now,
            modified_at: now,
            content: None,
        }
    }

    pub(crate) fn child(
        parent: NodeId,
        name: String,
        kind: NodeKind,
        owner: PrincipalId,
        content: Option<FileContent>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            name,
            parent: Some(parent),
            owner,
            created_at: now,
            modified_at: now,
            content,
        }
    }

    /// Rebuild a node from persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: NodeId,
        kind: NodeKind,
        name: String,
        parent: Option<NodeId>,
        owner: PrincipalId,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
        content: Option<FileContent>,
    ) -> Self {
        Self {
            id,
            kind,
            name,
            parent,
            owner,
            created_at,
            modified_at,
            content,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn owner(&self) -> &PrincipalId {
        &self.owner
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn content(&self) -> Option<&FileContent> {
        self.content.as_ref()
    }

    /// Size in bytes; folders have none.
    pub fn size(&self) -> Option<u64> {
        self.content.as_ref().map(|c| c.size)
    }

    pub(crate) fn relink(&mut self, parent: NodeId, name: String, now: DateTime<Utc>) {
        self.parent = Some(parent);
        self.name = name;
        self.modified_at = now;
    }

    pub(crate) fn set_content(&mut self, content: FileContent, now: DateTime<Utc>) {
        self.content = Some(content);
        self.modified_at = now;
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.modified_at = now;
    }
}

/// Check a single name against the naming rules.
pub fn validate_name(name: &str) -> Result<(), VfsError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative reference"
    } else if name.len() > MAX_NAME_LEN {
        "name is too long"
    } else if name.contains(['/', '\\', '\0']) {
        "name contains a reserved character"
    } else {
        return Ok(());
    };

    Err(VfsError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
