use axum::extract::State;
use axum::Json;

use crate::db;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub async fn get_current_user(
    state: State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = db::users::get_user(&state.db, &auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "data": {
            "user": user,
            "online": state.hub.is_online(&auth.user_id),
        }
    })))
}
