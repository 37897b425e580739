use sqlx::{Row, SqlitePool};

use crate::db::reactions;
use crate::error::AppError;
use crate::models::message::{CreateMessage, Message};
use crate::snowflake;

/// Largest page `list_messages` will return.
pub const MAX_PAGE: i64 = 100;

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        content: row.get("content"),
        reply_to_id: row.get("reply_to_id"),
        created_at: row.get("created_at"),
        edited_at: row.get("edited_at"),
        reactions: Vec::new(),
    }
}

const SELECT_MESSAGES: &str = "SELECT m.id, m.channel_id, m.author_id, u.username AS author_username, m.content, m.reply_to_id, m.created_at, m.edited_at FROM messages m JOIN users u ON u.id = m.author_id";

pub async fn get_message(pool: &SqlitePool, message_id: &str) -> Result<Message, AppError> {
    let row = sqlx::query(&format!("{SELECT_MESSAGES} WHERE m.id = ?"))
        .bind(message_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown_message".to_string()))?;

    let mut message = row_to_message(row);
    message.reactions = reactions::counts(pool, &message.id).await?;
    Ok(message)
}

/// Newest first. Returns up to `limit` messages older than `before` plus
/// whether more exist past the page.
pub async fn list_messages(
    pool: &SqlitePool,
    channel_id: &str,
    before: Option<&str>,
    limit: i64,
) -> Result<(Vec<Message>, bool), AppError> {
    let limit = limit.clamp(1, MAX_PAGE);
    let rows = match before {
        Some(before_id) => {
            sqlx::query(&format!(
                "{SELECT_MESSAGES} WHERE m.channel_id = ? AND CAST(m.id AS INTEGER) < CAST(? AS INTEGER) ORDER BY CAST(m.id AS INTEGER) DESC LIMIT ?"
            ))
            .bind(channel_id)
            .bind(before_id)
            .bind(limit + 1)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "{SELECT_MESSAGES} WHERE m.channel_id = ? ORDER BY CAST(m.id AS INTEGER) DESC LIMIT ?"
            ))
            .bind(channel_id)
            .bind(limit + 1)
            .fetch_all(pool)
            .await?
        }
    };

    let has_more = rows.len() as i64 > limit;
    let mut messages: Vec<Message> = rows
        .into_iter()
        .take(limit as usize)
        .map(row_to_message)
        .collect();

    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    let mut counts = reactions::counts_for(pool, &ids).await?;
    for message in &mut messages {
        if let Some(reactions) = counts.remove(&message.id) {
            message.reactions = reactions;
        }
    }

    Ok((messages, has_more))
}

pub async fn create_message(
    pool: &SqlitePool,
    channel_id: &str,
    author_id: &str,
    input: &CreateMessage,
) -> Result<Message, AppError> {
    let id = snowflake::generate();

    sqlx::query(
        "INSERT INTO messages (id, channel_id, author_id, content, reply_to_id) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(channel_id)
    .bind(author_id)
    .bind(&input.content)
    .bind(&input.reply_to_id)
    .execute(pool)
    .await?;

    get_message(pool, &id).await
}

pub async fn update_content(
    pool: &SqlitePool,
    message_id: &str,
    content: &str,
) -> Result<Message, AppError> {
    sqlx::query(
        "UPDATE messages SET content = ?, edited_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?",
    )
    .bind(content)
    .bind(message_id)
    .execute(pool)
    .await?;

    get_message(pool, message_id).await
}

pub async fn delete_message(pool: &SqlitePool, message_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}
