use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::{bare_token, AuthBackend, Authenticator};
use crate::db;
use crate::error::AppError;
use crate::state::AppState;

/// Caller identity resolved from `Authorization: Bearer <token>` by the
/// configured authenticator.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    /// The bare token, kept so logout can revoke it.
    pub token: String,
}

fn unauthorized() -> AppError {
    AppError::Unauthorized("invalid or missing authentication".to_string())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let auth = state.auth.clone();
        let pool = state.db.clone();
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let header = auth_header.ok_or_else(unauthorized)?;
            if !header.starts_with("Bearer ") {
                return Err(unauthorized());
            }
            let token = bare_token(&header).to_string();
            let identity = auth.validate(&token).await?;

            // Identities minted elsewhere need a local row before they can
            // own servers or messages.
            if !matches!(*auth, AuthBackend::Tokens(_)) {
                db::users::ensure_user(&pool, &identity.user_id, &identity.username).await?;
            }

            Ok(AuthUser {
                user_id: identity.user_id,
                username: identity.username,
                token,
            })
        }
    }
}
