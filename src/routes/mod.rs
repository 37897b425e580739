mod auth;
mod channels;
mod health;
mod messages;
mod reactions;
mod servers;
mod users;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/ws", get(crate::gateway::ws_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Auth (register/login are public, logout requires auth)
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        // Users
        .route("/users/@me", get(users::get_current_user))
        // Servers
        .route(
            "/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route("/servers/join", post(servers::join_server))
        .route(
            "/servers/{server_id}",
            get(servers::get_server).patch(servers::update_server),
        )
        .route(
            "/servers/{server_id}/members/@me",
            delete(servers::leave_server),
        )
        // Channels
        .route(
            "/servers/{server_id}/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route(
            "/channels/{channel_id}",
            patch(channels::update_channel).delete(channels::delete_channel),
        )
        // Messages
        .route(
            "/channels/{channel_id}/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route(
            "/channels/{channel_id}/messages/{message_id}",
            patch(messages::update_message).delete(messages::delete_message),
        )
        // Reactions
        .route(
            "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}",
            put(reactions::add_reaction).delete(reactions::remove_reaction),
        )
}
