use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::db;
use crate::error::AppError;
use crate::gateway::dispatch;
use crate::gateway::events::EventType;
use crate::middleware::auth::AuthUser;
use crate::middleware::permissions::{require_membership, require_owner};
use crate::models::server::{CreateServer, JoinServer, MemberJoined, MemberLeft, UpdateServer};
use crate::state::AppState;

/// Push an event to every current member of `server_id`.
pub(super) async fn to_members<T: Serialize + ?Sized>(
    state: &AppState,
    server_id: &str,
    event_type: EventType,
    data: &T,
) -> Result<usize, AppError> {
    let members = db::servers::list_member_ids(&state.db, server_id).await?;
    Ok(dispatch::to_users(
        &state.hub,
        members.iter().map(String::as_str),
        event_type,
        data,
    ))
}

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() || name.len() > 100 {
        return Err(AppError::BadRequest(
            "server name must be between 1 and 100 characters".to_string(),
        ));
    }
    Ok(())
}

pub async fn create_server(
    state: State<AppState>,
    auth: AuthUser,
    Json(input): Json<CreateServer>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    validate_name(&input.name)?;
    let server = db::servers::create_server(&state.db, &auth.user_id, &input).await?;
    tracing::info!(server_id = %server.id, owner_id = %auth.user_id, "server created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "data": server })),
    ))
}

pub async fn list_servers(
    state: State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let servers = db::servers::list_servers_for_user(&state.db, &auth.user_id).await?;
    Ok(Json(serde_json::json!({ "data": servers })))
}

pub async fn get_server(
    state: State<AppState>,
    Path(server_id): Path<String>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    require_membership(&state.db, &server_id, &auth.user_id).await?;
    let server = db::servers::get_server(&state.db, &server_id).await?;
    Ok(Json(serde_json::json!({ "data": server })))
}

pub async fn update_server(
    state: State<AppState>,
    Path(server_id): Path<String>,
    auth: AuthUser,
    Json(input): Json<UpdateServer>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_owner(&state.db, &server_id, &auth.user_id).await?;
    if let Some(ref name) = input.name {
        validate_name(name)?;
    }

    let server = db::servers::update_server(&state.db, &server_id, &input).await?;
    to_members(&state, &server_id, EventType::ServerUpdate, &server).await?;
    Ok(Json(serde_json::json!({ "data": server })))
}

pub async fn join_server(
    state: State<AppState>,
    auth: AuthUser,
    Json(input): Json<JoinServer>,
) -> Result<Json<serde_json::Value>, AppError> {
    let code = input.invite_code.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest("invite_code is required".to_string()));
    }

    let (server, created) = db::servers::join_by_invite(&state.db, code, &auth.user_id).await?;
    if created {
        // The new member is included.
        to_members(
            &state,
            &server.id,
            EventType::MemberJoin,
            &MemberJoined {
                server_id: server.id.clone(),
                user_id: auth.user_id.clone(),
                username: auth.username.clone(),
            },
        )
        .await?;
        tracing::info!(server_id = %server.id, user_id = %auth.user_id, "member joined");
    }

    Ok(Json(serde_json::json!({ "data": server })))
}

pub async fn leave_server(
    state: State<AppState>,
    Path(server_id): Path<String>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    require_membership(&state.db, &server_id, &auth.user_id).await?;
    // The leaver hears about their own departure too.
    let members = db::servers::list_member_ids(&state.db, &server_id).await?;
    db::servers::leave_server(&state.db, &server_id, &auth.user_id).await?;

    dispatch::to_users(
        &state.hub,
        members.iter().map(String::as_str),
        EventType::MemberLeave,
        &MemberLeft {
            server_id: server_id.clone(),
            user_id: auth.user_id.clone(),
        },
    );
    tracing::info!(server_id = %server_id, user_id = %auth.user_id, "member left");
    Ok(StatusCode::NO_CONTENT)
}
