use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub reactions: Vec<ReactionCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessage {
    pub content: String,
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessage {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub before: Option<String>,
    pub limit: Option<i64>,
}

/// Body of MESSAGE_DELETE.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDeleted {
    pub id: String,
    pub channel_id: String,
}

/// Body of REACTION_ADD and REACTION_REMOVE.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionEvent {
    pub message_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub emoji: String,
}
