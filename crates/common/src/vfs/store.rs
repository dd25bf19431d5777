use async_trait::async_trait;

use crate::share::ShareGrant;

use super::node::Node;
use super::txn::Changeset;

/// Durable home of the node and grant tables.
///
/// `commit` must apply a changeset atomically: either every row in it is
/// written or none is.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<(Vec<Node>, Vec<ShareGrant>)>;

    async fn commit(&self, changes: &Changeset) -> anyhow::Result<()>;
}

/// Keeps nothing. The in-memory tree is the only copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralStore;

#[async_trait]
impl TreeStore for EphemeralStore {
    async fn load(&self) -> anyhow::Result<(Vec<Node>, Vec<ShareGrant>)> {
        Ok((Vec::new(), Vec::new()))
    }

    async fn commit(&self, _changes: &Changeset) -> anyhow::Result<()> {
        Ok(())
    }
}
