//! Sign-in on top of an external credential verifier.
//!
//! Password hashing, TOTP secrets and OAuth flows all live behind
//! [`CredentialVerifier`]. What happens here is the part the filesystem cares
//! about: every principal that signs in ends up with a root folder.

use std::sync::Arc;

use async_trait::async_trait;

use crate::acl::PrincipalId;
use crate::vfs::{NodeId, Vfs, VfsError};

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_credential(&self, principal: &PrincipalId, secret: &str)
        -> anyhow::Result<bool>;

    /// Check a one-time code. Principals without a second factor should
    /// accept `None`.
    async fn verify_totp(&self, principal: &PrincipalId, code: Option<&str>)
        -> anyhow::Result<bool>;

    async fn issue_session_token(&self, principal: &PrincipalId) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct Session {
    pub principal: PrincipalId,
    pub token: String,
    pub root: NodeId,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("wrong one-time code")]
    WrongTotp,
    #[error("credential verifier error: {0}")]
    Verifier(anyhow::Error),
    #[error("vfs error: {0}")]
    Vfs(#[from] VfsError),
}

#[derive(Clone)]
pub struct SignIn {
    vfs: Vfs,
    verifier: Arc<dyn CredentialVerifier>,
}

impl SignIn {
    pub fn new(vfs: Vfs, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { vfs, verifier }
    }

    /// Password sign-in, with an optional second factor.
    pub async fn password(
        &self,
        principal: &PrincipalId,
        secret: &str,
        totp: Option<&str>,
    ) -> Result<Session, AuthError> {
        let valid = self
            .verifier
            .verify_credential(principal, secret)
            .await
            .map_err(AuthError::Verifier)?;
        if !valid {
            tracing::debug!(principal = %principal, "rejected credentials");
            return Err(AuthError::InvalidCredentials);
        }

        let totp_ok = self
            .verifier
            .verify_totp(principal, totp)
            .await
            .map_err(AuthError::Verifier)?;
        if !totp_ok {
            tracing::debug!(principal = %principal, "rejected one-time code");
            return Err(AuthError::WrongTotp);
        }

        self.open_session(principal).await
    }

    /// Sign-in for a principal an external identity provider already vouched
    /// for.
    pub async fn federated(&self, principal: &PrincipalId) -> Result<Session, AuthError> {
        self.open_session(principal).await
    }

    async fn open_session(&self, principal: &PrincipalId) -> Result<Session, AuthError> {
        let root = self.vfs.ensure_root(principal).await?;
        let token = self
            .verifier
            .issue_session_token(principal)
            .await
            .map_err(AuthError::Verifier)?;
        tracing::info!(principal = %principal, "signed in");
        Ok(Session {
            principal: principal.clone(),
            token,
            root,
        })
    }
}
