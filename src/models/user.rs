use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: String,
}

/// Only loaded at login.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: String,
    pub username: String,
    pub password_hash: Option<String>,
}
