//! `TreeStore` backed by the `nodes` and `share_grants` tables.

use std::str::FromStr;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use common::acl::{Permission, PrincipalId};
use common::share::{Audience, GrantScope, GrantToken, ShareGrant};
use common::vfs::{Changeset, ContentHash, FileContent, Node, NodeId, NodeKind, TreeStore};

use super::Database;

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

fn node_from_row(row: &SqliteRow) -> anyhow::Result<Node> {
    let id: String = row.try_get("id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let kind: String = row.try_get("kind")?;
    let size: Option<i64> = row.try_get("size")?;
    let content_hash: Option<String> = row.try_get("content_hash")?;

    let kind = NodeKind::parse(&kind).ok_or_else(|| anyhow!("unknown node kind: {kind}"))?;
    let content = match (content_hash, size) {
        (Some(hash), Some(size)) => Some(FileContent {
            hash: ContentHash::from_hex(&hash)?,
            size: u64::try_from(size).context("negative file size")?,
        }),
        _ => None,
    };

    Ok(Node::from_parts(
        NodeId::from_str(&id).with_context(|| format!("bad node id {id}"))?,
        kind,
        row.try_get("name")?,
        parent_id.as_deref().map(NodeId::from_str).transpose()?,
        PrincipalId::new(row.try_get::<String, _>("owner")?),
        from_millis(row.try_get("created_at")?)?,
        from_millis(row.try_get("modified_at")?)?,
        content,
    ))
}

fn grant_from_row(row: &SqliteRow) -> anyhow::Result<ShareGrant> {
    let scope: String = row.try_get("scope")?;
    let permission: String = row.try_get("permission")?;
    let audience: Option<String> = row.try_get("audience")?;
    let anchor: String = row.try_get("anchor_id")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;

    let grant = ShareGrant::new(
        GrantToken::from(row.try_get::<String, _>("token")?),
        NodeId::from_str(&anchor).with_context(|| format!("bad anchor id {anchor}"))?,
        GrantScope::parse(&scope).ok_or_else(|| anyhow!("unknown grant scope: {scope}"))?,
        Permission::parse(&permission)
            .ok_or_else(|| anyhow!("unknown permission: {permission}"))?,
        audience
            .map(|principal| Audience::Principal(PrincipalId::new(principal)))
            .unwrap_or(Audience::Anyone),
        PrincipalId::new(row.try_get::<String, _>("issuer")?),
        expires_at.map(from_millis).transpose()?,
        from_millis(row.try_get("created_at")?)?,
    );
    Ok(grant.with_revoked(row.try_get::<i64, _>("revoked")? != 0))
}

#[async_trait]
impl TreeStore for Database {
    async fn load(&self) -> anyhow::Result<(Vec<Node>, Vec<ShareGrant>)> {
        let node_rows = sqlx::query(
            r#"
            SELECT id, parent_id, name, owner, kind, size, content_hash, created_at, modified_at
            FROM nodes
            "#,
        )
        .fetch_all(&**self)
        .await?;

        let grant_rows = sqlx::query(
            r#"
            SELECT token, anchor_id, scope, permission, audience, issuer,
                   created_at, expires_at, revoked
            FROM share_grants
            "#,
        )
        .fetch_all(&**self)
        .await?;

        let nodes = node_rows
            .iter()
            .map(node_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let grants = grant_rows
            .iter()
            .map(grant_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;

        tracing::debug!(nodes = nodes.len(), grants = grants.len(), "loaded tree rows");
        Ok((nodes, grants))
    }

    async fn commit(&self, changes: &Changeset) -> anyhow::Result<()> {
        let mut tx = self.begin().await?;

        // clear every touched row first so renames and swaps never trip the
        // (parent_id, name) index halfway through
        for id in changes
            .removed
            .iter()
            .chain(changes.nodes.iter().map(Node::id))
        {
            sqlx::query("DELETE FROM nodes WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        for node in &changes.nodes {
            let size = node
                .content()
                .map(|content| i64::try_from(content.size))
                .transpose()
                .context("file too large")?;
            sqlx::query(
                r#"
                INSERT INTO nodes
                    (id, parent_id, name, owner, kind, size, content_hash, created_at, modified_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(node.id().to_string())
            .bind(node.parent().map(|parent| parent.to_string()))
            .bind(node.name())
            .bind(node.owner().as_str())
            .bind(node.kind().as_str())
            .bind(size)
            .bind(node.content().map(|content| content.hash.as_str()))
            .bind(to_millis(node.created_at()))
            .bind(to_millis(node.modified_at()))
            .execute(&mut *tx)
            .await?;
        }

        for grant in &changes.grants {
            let audience = match grant.audience() {
                Audience::Anyone => None,
                Audience::Principal(principal) => Some(principal.as_str()),
            };
            sqlx::query(
                r#"
                INSERT INTO share_grants
                    (token, anchor_id, scope, permission, audience, issuer,
                     created_at, expires_at, revoked)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(token) DO UPDATE SET
                    expires_at = excluded.expires_at,
                    revoked = excluded.revoked
                "#,
            )
            .bind(grant.token().as_str())
            .bind(grant.anchor().to_string())
            .bind(grant.scope().as_str())
            .bind(grant.permission().as_str())
            .bind(audience)
            .bind(grant.issuer().as_str())
            .bind(to_millis(grant.created_at()))
            .bind(grant.expires_at().map(to_millis))
            .bind(grant.is_revoked())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            nodes = changes.nodes.len(),
            removed = changes.removed.len(),
            grants = changes.grants.len(),
            "committed changeset"
        );
        Ok(())
    }
}
