use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::db;
use crate::error::AppError;
use crate::gateway::dispatch;
use crate::gateway::events::EventType;
use crate::middleware::auth::AuthUser;
use crate::middleware::permissions::{require_channel_access, require_owner};
use crate::models::message::{
    CreateMessage, ListMessagesQuery, Message, MessageDeleted, UpdateMessage,
};
use crate::models::ListResponse;
use crate::state::AppState;

pub const MAX_CONTENT_LEN: usize = 4000;
const DEFAULT_PAGE: i64 = 50;

fn validate_content(content: &str) -> Result<(), AppError> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("content must not be empty".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(AppError::BadRequest(format!(
            "content must be at most {MAX_CONTENT_LEN} characters"
        )));
    }
    Ok(())
}

/// Load a message and check it lives in `channel_id`.
async fn message_in_channel(
    state: &AppState,
    channel_id: &str,
    message_id: &str,
) -> Result<Message, AppError> {
    let message = db::messages::get_message(&state.db, message_id).await?;
    if message.channel_id != channel_id {
        return Err(AppError::NotFound("unknown_message".to_string()));
    }
    Ok(message)
}

pub async fn list_messages(
    state: State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
    auth: AuthUser,
) -> Result<Json<ListResponse<Message>>, AppError> {
    require_channel_access(&state.db, &channel_id, &auth.user_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE);
    let (messages, has_more) = db::messages::list_messages(
        &state.db,
        &channel_id,
        query.before.as_deref(),
        limit,
    )
    .await?;

    let before = messages.last().map(|m| m.id.clone());
    Ok(Json(ListResponse::new(messages, before, has_more)))
}

pub async fn create_message(
    state: State<AppState>,
    Path(channel_id): Path<String>,
    auth: AuthUser,
    Json(input): Json<CreateMessage>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_channel_access(&state.db, &channel_id, &auth.user_id).await?;
    validate_content(&input.content)?;
    if let Some(ref reply_to) = input.reply_to_id {
        message_in_channel(&state, &channel_id, reply_to)
            .await
            .map_err(|_| AppError::BadRequest("reply_to_id must reference a message in this channel".to_string()))?;
    }

    let message = db::messages::create_message(&state.db, &channel_id, &auth.user_id, &input).await?;
    let delivered = dispatch::to_channel(&state.hub, &channel_id, EventType::MessageCreate, &message);
    tracing::debug!(message_id = %message.id, channel_id = %channel_id, delivered, "message created");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "data": message })),
    ))
}

pub async fn update_message(
    state: State<AppState>,
    Path((channel_id, message_id)): Path<(String, String)>,
    auth: AuthUser,
    Json(input): Json<UpdateMessage>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_channel_access(&state.db, &channel_id, &auth.user_id).await?;
    let existing = message_in_channel(&state, &channel_id, &message_id).await?;
    if existing.author_id != auth.user_id {
        return Err(AppError::Forbidden("only the author can edit a message".to_string()));
    }
    validate_content(&input.content)?;

    let message = db::messages::update_content(&state.db, &message_id, &input.content).await?;
    dispatch::to_channel(&state.hub, &channel_id, EventType::MessageUpdate, &message);
    Ok(Json(serde_json::json!({ "data": message })))
}

/// Authors can delete their own messages; server owners can delete any.
pub async fn delete_message(
    state: State<AppState>,
    Path((channel_id, message_id)): Path<(String, String)>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    let channel = require_channel_access(&state.db, &channel_id, &auth.user_id).await?;
    let existing = message_in_channel(&state, &channel_id, &message_id).await?;
    if existing.author_id != auth.user_id {
        require_owner(&state.db, &channel.server_id, &auth.user_id).await?;
    }

    db::messages::delete_message(&state.db, &message_id).await?;
    dispatch::to_channel(
        &state.hub,
        &channel_id,
        EventType::MessageDelete,
        &MessageDeleted {
            id: message_id,
            channel_id: channel_id.clone(),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}
