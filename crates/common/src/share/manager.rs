use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::acl::{self, Permission, PrincipalId};
use crate::vfs::{Node, NodeId, Tree, Vfs, VfsError, VfsPath};

use super::grant::{Audience, GrantScope, GrantSpec, GrantToken, ShareGrant};

/// Issues, revokes and looks up share grants on a [`Vfs`].
#[derive(Debug, Clone)]
pub struct ShareManager {
    vfs: Vfs,
}

impl Vfs {
    pub fn shares(&self) -> ShareManager {
        ShareManager { vfs: self.clone() }
    }
}

/// Only the issuer and the owner of the anchor's tree may manage a grant.
fn ensure_manager(tree: &Tree, actor: &PrincipalId, grant: &ShareGrant) -> Result<(), VfsError> {
    let owns_anchor = tree
        .get_node(grant.anchor())
        .is_some_and(|anchor| anchor.owner() == actor);
    if grant.issuer() == actor || owns_anchor {
        return Ok(());
    }
    Err(VfsError::NotOwner {
        principal: actor.clone(),
        token: grant.token().clone(),
    })
}

/// A grant that can be used right now, or the single uniform failure.
fn usable<'a>(
    tree: &'a Tree,
    token: &GrantToken,
    now: DateTime<Utc>,
) -> Result<&'a ShareGrant, VfsError> {
    tree.grant(token)
        .filter(|grant| grant.is_active(now) && tree.contains(grant.anchor()))
        .ok_or(VfsError::GrantUnavailable)
}

/// Like [`usable`], but only public links can be presented without an
/// identity. Grants made out to a principal look the same as unknown ones.
fn usable_link<'a>(
    tree: &'a Tree,
    token: &GrantToken,
    now: DateTime<Utc>,
) -> Result<&'a ShareGrant, VfsError> {
    usable(tree, token, now)
        .ok()
        .filter(|grant| matches!(grant.audience(), Audience::Anyone))
        .ok_or(VfsError::GrantUnavailable)
}

impl ShareManager {
    /// Issue a grant on `node`.
    ///
    /// Nobody can hand out more than they hold, and when re-sharing is
    /// disabled only the owner may issue at all. A subtree grant needs the
    /// issuer's own access to cover the subtree too.
    pub async fn issue(
        &self,
        actor: &PrincipalId,
        node: &NodeId,
        spec: GrantSpec,
    ) -> Result<ShareGrant, VfsError> {
        if spec.permission == Permission::None {
            return Err(VfsError::InvalidGrant("a grant must confer read or write"));
        }
        let allow_reshare = self.vfs.config().allow_reshare;

        let grant = self
            .vfs
            .transact(|txn| {
                let now = txn.now();
                let is_owner = txn.node(node)?.owner() == actor;
                // a subtree re-share may not reach further than the issuer does
                let effective = match spec.scope {
                    GrantScope::SingleNode => {
                        acl::effective_permission(txn.tree(), actor, node, now)
                    }
                    GrantScope::Subtree => acl::subtree_permission(txn.tree(), actor, node, now),
                };
                if (!is_owner && !allow_reshare) || !effective.allows(spec.permission) {
                    return Err(VfsError::InsufficientPermission {
                        principal: actor.clone(),
                        node: *node,
                        required: spec.permission,
                    });
                }

                let grant = ShareGrant::new(
                    GrantToken::generate(),
                    *node,
                    spec.scope,
                    spec.permission,
                    spec.audience,
                    actor.clone(),
                    spec.expires_at,
                    now,
                );
                txn.put_grant(grant.clone());
                Ok(grant)
            })
            .await?;

        tracing::info!(
            issuer = %actor,
            anchor = %node,
            scope = grant.scope().as_str(),
            permission = %grant.permission(),
            "issued share grant"
        );
        Ok(grant)
    }

    /// Revoke a grant. Revoking twice is fine.
    pub async fn revoke(&self, actor: &PrincipalId, token: &GrantToken) -> Result<(), VfsError> {
        let changed = self
            .vfs
            .transact(|txn| {
                let grant = txn.grant(token).ok_or(VfsError::GrantUnavailable)?;
                ensure_manager(txn.tree(), actor, grant)?;
                if grant.is_revoked() {
                    return Ok(false);
                }
                txn.update_grant(token, ShareGrant::revoke)?;
                Ok(true)
            })
            .await?;

        if changed {
            tracing::info!(actor = %actor, "revoked share grant");
        }
        Ok(())
    }

    /// Change or clear a grant's expiry.
    pub async fn update_expiry(
        &self,
        actor: &PrincipalId,
        token: &GrantToken,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ShareGrant, VfsError> {
        self.vfs
            .transact(|txn| {
                let grant = txn.grant(token).ok_or(VfsError::GrantUnavailable)?;
                ensure_manager(txn.tree(), actor, grant)?;
                txn.update_grant(token, |grant| grant.set_expiry(expires_at))?;
                txn.grant(token).cloned().ok_or(VfsError::GrantUnavailable)
            })
            .await
    }

    /// The grant behind `token` if it is usable. Unknown, revoked, expired
    /// and dangling tokens are indistinguishable.
    pub fn lookup(&self, token: &GrantToken) -> Result<ShareGrant, VfsError> {
        let tree = self.vfs.snapshot();
        usable(&tree, token, Utc::now()).cloned()
    }

    /// Full record of a grant, usable or not, for whoever may manage it.
    pub fn inspect(&self, actor: &PrincipalId, token: &GrantToken) -> Result<ShareGrant, VfsError> {
        let tree = self.vfs.snapshot();
        let grant = tree.grant(token).ok_or(VfsError::GrantUnavailable)?;
        ensure_manager(&tree, actor, grant)?;
        Ok(grant.clone())
    }

    /// Every grant ever anchored at `node`, oldest first. Owner only.
    pub fn grants_on(&self, actor: &PrincipalId, node: &NodeId) -> Result<Vec<ShareGrant>, VfsError> {
        let tree = self.vfs.snapshot();
        if tree.node(node)?.owner() != actor {
            return Err(VfsError::InsufficientPermission {
                principal: actor.clone(),
                node: *node,
                required: Permission::Write,
            });
        }
        let mut grants: Vec<ShareGrant> = tree.grants_anchored_at(node).cloned().collect();
        grants.sort_by_key(|grant| grant.created_at());
        Ok(grants)
    }

    /// Resolve `path` relative to a link's anchor.
    pub fn resolve_link(&self, token: &GrantToken, path: &VfsPath) -> Result<Node, VfsError> {
        let tree = self.vfs.snapshot();
        let now = Utc::now();
        let grant = usable_link(&tree, token, now)?;
        let node = tree.resolve(grant.anchor(), path)?;
        if acl::link_permission(&tree, grant, node.id(), now) == Permission::None {
            return Err(VfsError::GrantUnavailable);
        }
        Ok(node.clone())
    }

    pub fn authorize_link(&self, token: &GrantToken, node: &NodeId, required: Permission) -> bool {
        let tree = self.vfs.snapshot();
        let now = Utc::now();
        match usable_link(&tree, token, now) {
            Ok(grant) => acl::link_permission(&tree, grant, node, now).allows(required),
            Err(_) => false,
        }
    }

    /// Download a file through a link.
    pub async fn read_link_file(&self, token: &GrantToken, file: &NodeId) -> Result<Bytes, VfsError> {
        let content = {
            let tree = self.vfs.snapshot();
            let now = Utc::now();
            let grant = usable_link(&tree, token, now)?;
            if !acl::link_permission(&tree, grant, file, now).allows(Permission::Read) {
                return Err(VfsError::GrantUnavailable);
            }
            tree.node(file)?
                .content()
                .cloned()
                .ok_or(VfsError::NotAFile(*file))?
        };
        self.vfs.fetch(&content).await
    }

    /// Drop expired grants from the active index. Records are kept, and
    /// evaluation ignores expired grants anyway, so this only keeps the index
    /// small. Returns how many grants were dropped.
    pub async fn sweep_expired(&self) -> Result<usize, VfsError> {
        let swept = self
            .vfs
            .transact(|txn| {
                let expired = txn.expired_indexed(txn.now());
                for token in &expired {
                    txn.unindex_grant(token);
                }
                Ok(expired.len())
            })
            .await?;

        if swept > 0 {
            tracing::info!(swept, "swept expired share grants");
        }
        Ok(swept)
    }
}
