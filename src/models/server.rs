use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub invite_code: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateServer {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServer {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinServer {
    pub invite_code: String,
}

/// Body of MEMBER_JOIN.
#[derive(Debug, Clone, Serialize)]
pub struct MemberJoined {
    pub server_id: String,
    pub user_id: String,
    pub username: String,
}

/// Body of MEMBER_LEAVE.
#[derive(Debug, Clone, Serialize)]
pub struct MemberLeft {
    pub server_id: String,
    pub user_id: String,
}
