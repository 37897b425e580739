use async_trait::async_trait;
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use super::{AuthError, Authenticator, Identity};

/// How long a token issued at login stays valid.
const TOKEN_TTL_DAYS: i64 = 30;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Tokens are stored only as their SHA-256 digest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

/// 256 random bits, hex encoded.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    HEXLOWER.encode(&bytes)
}

/// Opaque bearer tokens backed by the `user_tokens` table.
#[derive(Clone)]
pub struct TokenStore {
    db: SqlitePool,
}

impl TokenStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create and persist a fresh token for `user_id`. The raw token is only
    /// ever returned here.
    pub async fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let token = generate_token();
        let expires_at = (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS))
            .format(TIMESTAMP_FORMAT)
            .to_string();

        sqlx::query("INSERT INTO user_tokens (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(hash_token(&token))
            .bind(user_id)
            .bind(&expires_at)
            .execute(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(token)
    }

    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM user_tokens WHERE token_hash = ?")
            .bind(hash_token(token))
            .execute(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(e: sqlx::Error) -> AuthError {
    tracing::error!("token store query failed: {e}");
    AuthError::Unavailable("token store unavailable".to_string())
}

#[async_trait]
impl Authenticator for TokenStore {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT ut.user_id, u.username, ut.expires_at FROM user_tokens ut JOIN users u ON ut.user_id = u.id WHERE ut.token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.db)
        .await
        .map_err(unavailable)?;

        let (user_id, username, expires_at) = row.ok_or(AuthError::Invalid)?;
        let now = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
        if expires_at < now {
            return Err(AuthError::Expired);
        }
        Ok(Identity { user_id, username })
    }
}
