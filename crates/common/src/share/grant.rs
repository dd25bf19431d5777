use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acl::{Permission, PrincipalId};
use crate::vfs::NodeId;

/// Bytes of randomness behind a grant token.
pub const TOKEN_BYTES: usize = 32;

/// Characters of a token shown in errors and debug output.
const SHOWN_PREFIX: usize = 8;

/// Unguessable bearer token identifying a grant.
///
/// `Debug` only shows a prefix. `Display` and [`GrantToken::as_str`] give the
/// full secret and are meant for handing the token to its holder.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantToken(String);

impl GrantToken {
    pub fn generate() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Enough of the token to tell grants apart in logs.
    pub fn short(&self) -> &str {
        if self.0.len() <= SHOWN_PREFIX {
            return "";
        }
        self.0.get(..SHOWN_PREFIX).unwrap_or("")
    }
}

impl fmt::Debug for GrantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GrantToken({}..)", self.short())
    }
}

impl From<String> for GrantToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for GrantToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for GrantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// Only the anchor node itself.
    SingleNode,
    /// The anchor and everything below it.
    Subtree,
}

impl GrantScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantScope::SingleNode => "node",
            GrantScope::Subtree => "subtree",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(GrantScope::SingleNode),
            "subtree" => Some(GrantScope::Subtree),
            _ => None,
        }
    }
}

/// Who a grant is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// A public link: whoever holds the token.
    Anyone,
    Principal(PrincipalId),
}

impl Audience {
    /// Whether the grant applies to `principal`. Anonymous callers pass `None`.
    pub fn admits(&self, principal: Option<&PrincipalId>) -> bool {
        match self {
            Audience::Anyone => true,
            Audience::Principal(target) => principal == Some(target),
        }
    }
}

/// A capability handed out on a node. Grants are never deleted, only
/// revoked or left to expire, so they stay available for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    token: GrantToken,
    anchor: NodeId,
    scope: GrantScope,
    permission: Permission,
    audience: Audience,
    issuer: PrincipalId,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    revoked: bool,
}

impl ShareGrant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: GrantToken,
        anchor: NodeId,
        scope: GrantScope,
        permission: Permission,
        audience: Audience,
        issuer: PrincipalId,
        expires_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            anchor,
            scope,
            permission,
            audience,
            issuer,
            created_at,
            expires_at,
            revoked: false,
        }
    }

    pub fn token(&self) -> &GrantToken {
        &self.token
    }

    pub fn anchor(&self) -> &NodeId {
        &self.anchor
    }

    pub fn scope(&self) -> GrantScope {
        self.scope
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    pub fn issuer(&self) -> &PrincipalId {
        &self.issuer
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    pub(crate) fn revoke(&mut self) {
        self.revoked = true;
    }

    pub(crate) fn set_expiry(&mut self, expires_at: Option<DateTime<Utc>>) {
        self.expires_at = expires_at;
    }

    /// Used when rebuilding a grant from persisted rows.
    pub fn with_revoked(mut self, revoked: bool) -> Self {
        self.revoked = revoked;
        self
    }
}

/// What a caller asks for when issuing a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSpec {
    pub audience: Audience,
    pub scope: GrantScope,
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantSpec {
    /// A public subtree link.
    pub fn public_link(permission: Permission) -> Self {
        Self {
            audience: Audience::Anyone,
            scope: GrantScope::Subtree,
            permission,
            expires_at: None,
        }
    }

    pub fn for_principal(principal: PrincipalId, permission: Permission) -> Self {
        Self {
            audience: Audience::Principal(principal),
            scope: GrantScope::Subtree,
            permission,
            expires_at: None,
        }
    }

    pub fn single_node(mut self) -> Self {
        self.scope = GrantScope::SingleNode;
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_token_is_random_hex() {
        let a = GrantToken::generate();
        let b = GrantToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), TOKEN_BYTES * 2);
        assert!(hex::decode(a.as_str()).is_ok());
    }

    #[test]
    fn test_debug_hides_token() {
        let token = GrantToken::generate();
        let shown = format!("{:?}", token);
        assert!(!shown.contains(token.as_str()));
        assert!(shown.contains(token.short()));
        assert_eq!(token.short().len(), SHOWN_PREFIX);
        assert_eq!(GrantToken::from("abc").short(), "");
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let grant = ShareGrant::new(
            GrantToken::generate(),
            NodeId::new(),
            GrantScope::Subtree,
            Permission::Read,
            Audience::Anyone,
            PrincipalId::new("alice"),
            Some(now + Duration::seconds(5)),
            now,
        );
        assert!(grant.is_active(now));
        assert!(!grant.is_active(now + Duration::seconds(5)));
        assert!(grant.is_expired(now + Duration::seconds(6)));
    }

    #[test]
    fn test_audience_admits() {
        let bob = PrincipalId::new("bob");
        assert!(Audience::Anyone.admits(None));
        assert!(Audience::Principal(bob.clone()).admits(Some(&bob)));
        assert!(!Audience::Principal(bob).admits(Some(&PrincipalId::new("eve"))));
    }

    #[test]
    fn test_scope_roundtrip() {
        assert_eq!(GrantScope::parse("node"), Some(GrantScope::SingleNode));
        assert_eq!(
            GrantScope::parse(GrantScope::Subtree.as_str()),
            Some(GrantScope::Subtree)
        );
    }
}
