use sqlx::{Row, SqlitePool};

use crate::error::AppError;
use crate::models::user::{User, UserCredentials};
use crate::snowflake;

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    }
}

const SELECT_USERS: &str = "SELECT id, username, display_name, created_at FROM users";

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<User, AppError> {
    let row = sqlx::query(&format!("{SELECT_USERS} WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown_user".to_string()))?;

    Ok(row_to_user(row))
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
) -> Result<User, AppError> {
    let id = snowflake::generate();

    sqlx::query("INSERT INTO users (id, username, display_name, password_hash) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(username)
        .bind(username)
        .bind(password_hash)
        .execute(pool)
        .await?;

    get_user(pool, &id).await
}

pub async fn username_taken(pool: &SqlitePool, username: &str) -> Result<bool, AppError> {
    let existing = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(existing.is_some())
}

pub async fn get_credentials(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<UserCredentials>, AppError> {
    let row = sqlx::query_as::<_, (String, String, Option<String>)>(
        "SELECT id, username, password_hash FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, username, password_hash)| UserCredentials {
        id,
        username,
        password_hash,
    }))
}

/// Make sure a user known to an external identity provider exists locally,
/// so foreign keys on messages and memberships hold. A rename at the provider
/// is carried over; a username held by a different local user is a conflict.
pub async fn ensure_user(pool: &SqlitePool, user_id: &str, username: &str) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO users (id, username, display_name) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET username = excluded.username",
    )
    .bind(user_id)
    .bind(username)
    .bind(username)
    .execute(pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("username already taken".to_string()),
        other => other,
    })?;
    Ok(())
}
