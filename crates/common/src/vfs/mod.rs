mod content;
mod engine;
mod error;
mod node;
mod path;
mod resolver;
mod store;
mod tree;
mod txn;

pub use content::{ContentHash, ContentStore, MemoryContentStore};
pub use engine::{UploadOptions, Vfs, VfsConfig};
pub use error::VfsError;
pub use node::{validate_name, FileContent, Node, NodeId, NodeKind, MAX_NAME_LEN};
pub use path::VfsPath;
pub use store::{EphemeralStore, TreeStore};
pub use tree::{Lineage, Tree};
pub use txn::{Changeset, Transaction};
