use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::message::ReactionCount;

/// Returns `false` if the user had already reacted with `emoji`.
pub async fn add(
    pool: &SqlitePool,
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?, ?, ?)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns `false` if there was nothing to remove.
pub async fn remove(
    pool: &SqlitePool,
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Result<bool, AppError> {
    let result =
        sqlx::query("DELETE FROM reactions WHERE message_id = ? AND user_id = ? AND emoji = ?")
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn counts(pool: &SqlitePool, message_id: &str) -> Result<Vec<ReactionCount>, AppError> {
    let mut by_message = counts_for(pool, &[message_id]).await?;
    Ok(by_message.remove(message_id).unwrap_or_default())
}

/// Reaction tallies keyed by message id, emojis in first-used order.
pub async fn counts_for(
    pool: &SqlitePool,
    message_ids: &[&str],
) -> Result<HashMap<String, Vec<ReactionCount>>, AppError> {
    let mut out: HashMap<String, Vec<ReactionCount>> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(out);
    }

    let placeholders = vec!["?"; message_ids.len()].join(", ");
    let query = format!(
        "SELECT message_id, emoji, COUNT(*) AS count FROM reactions WHERE message_id IN ({placeholders}) \
         GROUP BY message_id, emoji ORDER BY message_id, MIN(created_at), emoji"
    );
    let mut q = sqlx::query_as::<_, (String, String, i64)>(&query);
    for id in message_ids {
        q = q.bind(*id);
    }

    for (message_id, emoji, count) in q.fetch_all(pool).await? {
        out.entry(message_id)
            .or_default()
            .push(ReactionCount { emoji, count });
    }
    Ok(out)
}
