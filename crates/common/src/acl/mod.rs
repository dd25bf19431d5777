//! Access-control evaluation.
//!
//! Ownership always yields [`Permission::Write`]. Everyone else gets the
//! highest permission among the share grants that reach the node and are
//! still usable at evaluation time. Grants never subtract.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::share::{Audience, GrantScope, ShareGrant};
use crate::vfs::{NodeId, Tree, VfsError};

/// An authenticated principal as handed to us by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PrincipalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Totally ordered: `None < Read < Write`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    None,
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Read => "read",
            Permission::Write => "write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Permission::None),
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            _ => None,
        }
    }

    pub fn allows(&self, required: Permission) -> bool {
        *self >= required
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold ownership and the applicable grants into an effective permission.
///
/// Revoked and expired grants are skipped here rather than relying on the
/// sweep, so a grant stops working the instant it expires.
pub fn evaluate<'a, I>(is_owner: bool, grants: I, now: DateTime<Utc>) -> Permission
where
    I: IntoIterator<Item = &'a ShareGrant>,
{
    if is_owner {
        return Permission::Write;
    }

    grants
        .into_iter()
        .filter(|grant| grant.is_active(now))
        .map(|grant| grant.permission())
        .max()
        .unwrap_or(Permission::None)
}

/// Grants reaching `node` for `principal` (or for an anonymous bearer when
/// `principal` is `None`).
///
/// A grant anchored on the node itself applies at either scope; one anchored
/// on a strict ancestor only when it covers the whole subtree.
pub fn applicable_grants<'a>(
    tree: &'a Tree,
    node: &NodeId,
    principal: Option<&PrincipalId>,
) -> Vec<&'a ShareGrant> {
    let mut applicable = Vec::new();
    for (depth, ancestor) in tree.lineage(node).enumerate() {
        for grant in tree.active_grants(ancestor.id()) {
            if depth > 0 && grant.scope() != GrantScope::Subtree {
                continue;
            }
            if !grant.audience().admits(principal) {
                continue;
            }
            applicable.push(grant);
        }
    }
    applicable
}

/// Effective permission of `principal` on `node`. Unknown nodes yield
/// [`Permission::None`].
pub fn effective_permission(
    tree: &Tree,
    principal: &PrincipalId,
    node: &NodeId,
    now: DateTime<Utc>,
) -> Permission {
    let Some(target) = tree.get_node(node) else {
        return Permission::None;
    };
    // every node carries its root's owner
    let is_owner = target.owner() == principal;
    evaluate(
        is_owner,
        applicable_grants(tree, node, Some(principal)),
        now,
    )
}

/// Permission `principal` holds on `node` through subtree-scoped access
/// alone. Bounds what a re-share covering descendants may confer.
pub fn subtree_permission(
    tree: &Tree,
    principal: &PrincipalId,
    node: &NodeId,
    now: DateTime<Utc>,
) -> Permission {
    let Some(target) = tree.get_node(node) else {
        return Permission::None;
    };
    let is_owner = target.owner() == principal;
    let covering = applicable_grants(tree, node, Some(principal))
        .into_iter()
        .filter(|grant| grant.scope() == GrantScope::Subtree);
    evaluate(is_owner, covering, now)
}

/// Permission an anonymous bearer holds on `node` through a single grant.
/// Only public links work without an identity.
pub fn link_permission(
    tree: &Tree,
    grant: &ShareGrant,
    node: &NodeId,
    now: DateTime<Utc>,
) -> Permission {
    if !matches!(grant.audience(), Audience::Anyone) {
        return Permission::None;
    }
    if !grant.is_active(now) || !tree.contains(grant.anchor()) {
        return Permission::None;
    }
    let reaches = match grant.scope() {
        GrantScope::SingleNode => node == grant.anchor(),
        GrantScope::Subtree => tree.is_same_or_descendant(node, grant.anchor()),
    };
    if reaches {
        grant.permission()
    } else {
        Permission::None
    }
}

/// The gate every operation goes through. Fails uniformly with
/// [`VfsError::InsufficientPermission`], whatever made the grant unusable.
pub fn require(
    tree: &Tree,
    principal: &PrincipalId,
    node: &NodeId,
    required: Permission,
    now: DateTime<Utc>,
) -> Result<(), VfsError> {
    if !tree.contains(node) {
        return Err(VfsError::NodeNotFound(*node));
    }
    let effective = effective_permission(tree, principal, node, now);
    if effective.allows(required) {
        Ok(())
    } else {
        tracing::debug!(
            principal = %principal,
            node = %node,
            required = %required,
            effective = %effective,
            "access denied"
        );
        Err(VfsError::InsufficientPermission {
            principal: principal.clone(),
            node: *node,
            required,
        })
    }
}
