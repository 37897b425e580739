//! Credential validation.
//!
//! The gateway and the HTTP layer only see the [`Authenticator`] contract:
//! a token goes in, an [`Identity`] or an [`AuthError`] comes out. Which
//! realization answers is picked from configuration.

pub mod claims;
pub mod jwks;
pub mod jwt;
pub mod token_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::AuthMode;
use jwks::JwksAuthenticator;
use jwt::JwtAuthenticator;
use token_store::TokenStore;

/// Who a validated credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token")]
    Invalid,
    #[error("expired token")]
    Expired,
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Strip an optional `Bearer ` scheme so HTTP headers and IDENTIFY payloads
/// can carry the same string.
pub fn bare_token(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

/// The configured authenticator.
pub enum AuthBackend {
    /// Opaque bearer tokens stored hashed in the database.
    Tokens(TokenStore),
    /// HS256 JWTs signed with a local shared secret.
    Jwt(JwtAuthenticator),
    /// JWTs verified against a remotely published key set.
    Jwks(JwksAuthenticator),
}

impl AuthBackend {
    pub fn from_mode(mode: &AuthMode, db: SqlitePool) -> Self {
        match mode {
            AuthMode::Token => AuthBackend::Tokens(TokenStore::new(db)),
            AuthMode::Jwt { secret } => AuthBackend::Jwt(JwtAuthenticator::new(secret.as_bytes())),
            AuthMode::Jwks { url } => AuthBackend::Jwks(JwksAuthenticator::new(url)),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            AuthBackend::Tokens(_) => "token",
            AuthBackend::Jwt(_) => "jwt",
            AuthBackend::Jwks(_) => "jwks",
        }
    }

    /// Mint a credential for a user who just proved their password.
    /// `Ok(None)` when credentials are issued by an external identity provider.
    pub async fn issue(&self, identity: &Identity) -> Result<Option<String>, AuthError> {
        match self {
            AuthBackend::Tokens(store) => store.issue(&identity.user_id).await.map(Some),
            AuthBackend::Jwt(jwt) => jwt.issue(identity, jwt::DEFAULT_TTL).map(Some),
            AuthBackend::Jwks(_) => Ok(None),
        }
    }

    /// Invalidate a credential where that is possible. Stateless tokens
    /// simply expire.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        match self {
            AuthBackend::Tokens(store) => store.revoke(bare_token(token)).await,
            AuthBackend::Jwt(_) | AuthBackend::Jwks(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Authenticator for AuthBackend {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let token = bare_token(token);
        if token.is_empty() {
            return Err(AuthError::Invalid);
        }
        match self {
            AuthBackend::Tokens(store) => store.validate(token).await,
            AuthBackend::Jwt(jwt) => jwt.validate(token).await,
            AuthBackend::Jwks(jwks) => jwks.validate(token).await,
        }
    }
}
