use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::db;
use crate::error::AppError;
use crate::gateway::dispatch;
use crate::gateway::events::EventType;
use crate::middleware::auth::AuthUser;
use crate::middleware::permissions::require_channel_access;
use crate::models::message::ReactionEvent;
use crate::state::AppState;

fn validate_emoji(emoji: &str) -> Result<(), AppError> {
    if emoji.is_empty() || emoji.len() > 64 || emoji.chars().any(char::is_whitespace) {
        return Err(AppError::BadRequest("invalid emoji".to_string()));
    }
    Ok(())
}

async fn check(
    state: &AppState,
    channel_id: &str,
    message_id: &str,
    emoji: &str,
    user_id: &str,
) -> Result<(), AppError> {
    validate_emoji(emoji)?;
    require_channel_access(&state.db, channel_id, user_id).await?;
    let message = db::messages::get_message(&state.db, message_id).await?;
    if message.channel_id != channel_id {
        return Err(AppError::NotFound("unknown_message".to_string()));
    }
    Ok(())
}

pub async fn add_reaction(
    state: State<AppState>,
    Path((channel_id, message_id, emoji)): Path<(String, String, String)>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    check(&state, &channel_id, &message_id, &emoji, &auth.user_id).await?;

    // Re-adding the same reaction is silent.
    if db::reactions::add(&state.db, &message_id, &auth.user_id, &emoji).await? {
        dispatch::to_channel(
            &state.hub,
            &channel_id,
            EventType::ReactionAdd,
            &ReactionEvent {
                message_id,
                channel_id: channel_id.clone(),
                user_id: auth.user_id,
                emoji,
            },
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_reaction(
    state: State<AppState>,
    Path((channel_id, message_id, emoji)): Path<(String, String, String)>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    check(&state, &channel_id, &message_id, &emoji, &auth.user_id).await?;

    if db::reactions::remove(&state.db, &message_id, &auth.user_id, &emoji).await? {
        dispatch::to_channel(
            &state.hub,
            &channel_id,
            EventType::ReactionRemove,
            &ReactionEvent {
                message_id,
                channel_id: channel_id.clone(),
                user_id: auth.user_id,
                emoji,
            },
        );
    }
    Ok(StatusCode::NO_CONTENT)
}
