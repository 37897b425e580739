use sqlx::{Row, SqlitePool};

use crate::error::AppError;
use crate::models::channel::{Channel, CreateChannel, UpdateChannel};
use crate::snowflake;

fn row_to_channel(row: sqlx::sqlite::SqliteRow) -> Channel {
    Channel {
        id: row.get("id"),
        server_id: row.get("server_id"),
        name: row.get("name"),
        topic: row.get("topic"),
        position: row.get("position"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_CHANNELS: &str =
    "SELECT id, server_id, name, topic, position, created_at, updated_at FROM channels";

pub async fn get_channel(pool: &SqlitePool, channel_id: &str) -> Result<Channel, AppError> {
    let row = sqlx::query(&format!("{SELECT_CHANNELS} WHERE id = ?"))
        .bind(channel_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown_channel".to_string()))?;

    Ok(row_to_channel(row))
}

pub async fn list_channels(pool: &SqlitePool, server_id: &str) -> Result<Vec<Channel>, AppError> {
    let rows = sqlx::query(&format!(
        "{SELECT_CHANNELS} WHERE server_id = ? ORDER BY position, id"
    ))
    .bind(server_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_channel).collect())
}

/// New channels go after the existing ones.
pub async fn create_channel(
    pool: &SqlitePool,
    server_id: &str,
    input: &CreateChannel,
) -> Result<Channel, AppError> {
    let id = snowflake::generate();
    let position: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM channels WHERE server_id = ?",
    )
    .bind(server_id)
    .fetch_one(pool)
    .await?;

    sqlx::query("INSERT INTO channels (id, server_id, name, topic, position) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(server_id)
        .bind(&input.name)
        .bind(input.topic.as_deref().unwrap_or(""))
        .bind(position)
        .execute(pool)
        .await?;

    get_channel(pool, &id).await
}

pub async fn update_channel(
    pool: &SqlitePool,
    channel_id: &str,
    input: &UpdateChannel,
) -> Result<Channel, AppError> {
    let mut sets = Vec::new();
    let mut str_values: Vec<&str> = Vec::new();

    if let Some(ref name) = input.name {
        sets.push("name = ?");
        str_values.push(name);
    }
    if let Some(ref topic) = input.topic {
        sets.push("topic = ?");
        str_values.push(topic);
    }
    if input.position.is_some() {
        sets.push("position = ?");
    }

    if sets.is_empty() {
        return get_channel(pool, channel_id).await;
    }

    sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')");
    let query = format!("UPDATE channels SET {} WHERE id = ?", sets.join(", "));
    let mut q = sqlx::query(&query);
    for v in str_values {
        q = q.bind(v);
    }
    if let Some(position) = input.position {
        q = q.bind(position);
    }
    q.bind(channel_id).execute(pool).await?;

    get_channel(pool, channel_id).await
}

pub async fn delete_channel(pool: &SqlitePool, channel_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM channels WHERE id = ?")
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}
