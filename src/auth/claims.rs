use serde::{Deserialize, Serialize};

use super::{AuthError, Identity};

/// Identity data an OAuth provider nests under `ext`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// JWT claims accepted by both the shared-secret and the key-set validators.
///
/// Tokens minted here carry `user_id`/`username` at the top level; tokens
/// from an external provider usually carry them under `ext` and may only
/// have `sub` for the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<ExtClaims>,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

impl Claims {
    pub fn into_identity(self) -> Result<Identity, AuthError> {
        let ext = self.ext.unwrap_or_default();
        let user_id = ext
            .user_id
            .or(self.user_id)
            .or(self.sub)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::Invalid)?;
        let username = ext
            .username
            .or(self.username)
            .filter(|name| !name.is_empty())
            .ok_or(AuthError::Invalid)?;
        Ok(Identity { user_id, username })
    }
}
