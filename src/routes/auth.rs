use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::auth::{AuthBackend, Identity};
use crate::db;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

fn local_accounts_only(state: &AppState) -> Result<(), AppError> {
    if matches!(*state.auth, AuthBackend::Jwks(_)) {
        return Err(AppError::Forbidden(
            "accounts are managed by the identity provider".to_string(),
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    local_accounts_only(&state)?;

    let username = input.username.trim();
    if username.is_empty() || username.len() > 32 {
        return Err(AppError::BadRequest(
            "username must be between 1 and 32 characters".to_string(),
        ));
    }
    if input.password.len() < 8 || input.password.len() > 128 {
        return Err(AppError::BadRequest(
            "password must be between 8 and 128 characters".to_string(),
        ));
    }

    if db::users::username_taken(&state.db, username).await? {
        return Err(AppError::Conflict("username already taken".to_string()));
    }

    // Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(input.password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?
        .to_string();

    let user = db::users::create_user(&state.db, username, &password_hash).await?;
    let token = state
        .auth
        .issue(&Identity {
            user_id: user.id.clone(),
            username: user.username.clone(),
        })
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok(Json(serde_json::json!({
        "data": {
            "user": user,
            "token": token
        }
    })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    local_accounts_only(&state)?;

    let invalid = || AppError::Unauthorized("invalid credentials".to_string());

    let credentials = db::users::get_credentials(&state.db, input.username.trim())
        .await?
        .ok_or_else(invalid)?;
    let stored_hash = credentials.password_hash.as_deref().ok_or_else(invalid)?;

    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Internal(format!("stored hash parse failed: {e}")))?;
    if Argon2::default()
        .verify_password(input.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(invalid());
    }

    let user = db::users::get_user(&state.db, &credentials.id).await?;
    let token = state
        .auth
        .issue(&Identity {
            user_id: credentials.id,
            username: credentials.username,
        })
        .await?;

    Ok(Json(serde_json::json!({
        "data": {
            "user": user,
            "token": token
        }
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    state.auth.revoke(&auth.token).await?;

    Ok(Json(serde_json::json!({
        "data": { "ok": true }
    })))
}
