use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::servers::to_members;
use crate::db;
use crate::error::AppError;
use crate::gateway::events::EventType;
use crate::middleware::auth::AuthUser;
use crate::middleware::permissions::{require_membership, require_owner};
use crate::models::channel::{ChannelDeleted, CreateChannel, UpdateChannel};
use crate::state::AppState;

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() || name.len() > 100 {
        return Err(AppError::BadRequest(
            "channel name must be between 1 and 100 characters".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_channels(
    state: State<AppState>,
    Path(server_id): Path<String>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    require_membership(&state.db, &server_id, &auth.user_id).await?;
    let channels = db::channels::list_channels(&state.db, &server_id).await?;
    Ok(Json(serde_json::json!({ "data": channels })))
}

pub async fn create_channel(
    state: State<AppState>,
    Path(server_id): Path<String>,
    auth: AuthUser,
    Json(input): Json<CreateChannel>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_owner(&state.db, &server_id, &auth.user_id).await?;
    validate_name(&input.name)?;

    let channel = db::channels::create_channel(&state.db, &server_id, &input).await?;
    to_members(&state, &server_id, EventType::ChannelCreate, &channel).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "data": channel })),
    ))
}

pub async fn update_channel(
    state: State<AppState>,
    Path(channel_id): Path<String>,
    auth: AuthUser,
    Json(input): Json<UpdateChannel>,
) -> Result<Json<serde_json::Value>, AppError> {
    let existing = db::channels::get_channel(&state.db, &channel_id).await?;
    require_owner(&state.db, &existing.server_id, &auth.user_id).await?;
    if let Some(ref name) = input.name {
        validate_name(name)?;
    }

    let channel = db::channels::update_channel(&state.db, &channel_id, &input).await?;
    to_members(&state, &channel.server_id, EventType::ChannelUpdate, &channel).await?;
    Ok(Json(serde_json::json!({ "data": channel })))
}

pub async fn delete_channel(
    state: State<AppState>,
    Path(channel_id): Path<String>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    let channel = db::channels::get_channel(&state.db, &channel_id).await?;
    require_owner(&state.db, &channel.server_id, &auth.user_id).await?;

    db::channels::delete_channel(&state.db, &channel_id).await?;
    to_members(
        &state,
        &channel.server_id,
        EventType::ChannelDelete,
        &ChannelDeleted {
            id: channel.id.clone(),
            server_id: channel.server_id.clone(),
        },
    )
    .await?;

    tracing::info!(channel_id = %channel.id, server_id = %channel.server_id, "channel deleted");
    Ok(StatusCode::NO_CONTENT)
}
