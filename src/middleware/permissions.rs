use sqlx::SqlitePool;

use crate::db;
use crate::error::AppError;
use crate::models::channel::Channel;
use crate::models::server::Server;

/// Fail with 403 unless `user_id` belongs to the server. Unknown servers are
/// reported as 404.
pub async fn require_membership(
    pool: &SqlitePool,
    server_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    db::servers::get_server(pool, server_id).await?;
    if !db::servers::is_member(pool, server_id, user_id).await? {
        return Err(AppError::Forbidden("not a member of this server".to_string()));
    }
    Ok(())
}

/// Load a channel the caller can see.
pub async fn require_channel_access(
    pool: &SqlitePool,
    channel_id: &str,
    user_id: &str,
) -> Result<Channel, AppError> {
    let channel = db::channels::get_channel(pool, channel_id).await?;
    require_membership(pool, &channel.server_id, user_id).await?;
    Ok(channel)
}

/// Load a server only its owner may manage.
pub async fn require_owner(
    pool: &SqlitePool,
    server_id: &str,
    user_id: &str,
) -> Result<Server, AppError> {
    let server = db::servers::get_server(pool, server_id).await?;
    if server.owner_id != user_id {
        return Err(AppError::Forbidden("only the server owner can do that".to_string()));
    }
    Ok(server)
}
