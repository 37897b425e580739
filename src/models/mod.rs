pub mod channel;
pub mod message;
pub mod server;
pub mod user;

use serde::Serialize;

/// Standard envelope for single-resource responses.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Standard envelope for paginated list responses.
#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// Pass `before` back to fetch the next, older page.
#[derive(Debug, Serialize)]
pub struct Cursor {
    pub before: String,
    pub has_more: bool,
}

impl<T: Serialize> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(data: Vec<T>, before: Option<String>, has_more: bool) -> Self {
        Self {
            data,
            cursor: before.map(|before| Cursor { before, has_more }),
        }
    }
}
