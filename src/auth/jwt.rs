use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::claims::Claims;
use super::{AuthError, Authenticator, Identity};

/// Lifetime of tokens minted at login.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// HS256 tokens signed and verified with one local secret.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: Some(identity.user_id.clone()),
            user_id: Some(identity.user_id.clone()),
            username: Some(identity.username.clone()),
            ext: None,
            exp: now + ttl.as_secs(),
            iat: now,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Unavailable(format!("failed to sign token: {e}")))
    }
}

/// Map a verification failure to the public taxonomy. Anything other than
/// expiry collapses into `Invalid`.
pub(crate) fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid,
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(classify)?;
        data.claims.into_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_id: "100".to_string(),
            username: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let auth = JwtAuthenticator::new(b"top-secret");
        let token = auth.issue(&alice(), Duration::from_secs(60)).unwrap();
        assert_eq!(auth.validate(&token).await.unwrap(), alice());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_invalid() {
        let token = JwtAuthenticator::new(b"one")
            .issue(&alice(), Duration::from_secs(60))
            .unwrap();
        let err = JwtAuthenticator::new(b"two").validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Invalid));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let auth = JwtAuthenticator::new(b"top-secret");
        let past = chrono::Utc::now().timestamp() as u64 - 120;
        let claims = Claims {
            sub: None,
            user_id: Some("100".to_string()),
            username: Some("alice".to_string()),
            ext: None,
            exp: past,
            iat: past - 60,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"top-secret"),
        )
        .unwrap();
        assert!(matches!(auth.validate(&token).await, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn test_garbage_is_invalid() {
        let auth = JwtAuthenticator::new(b"top-secret");
        for token in ["", "abc", "a.b.c", "eyJhbGciOiJIUzI1NiJ9.e30.AAAA"] {
            assert!(matches!(auth.validate(token).await, Err(AuthError::Invalid)));
        }
    }

    #[tokio::test]
    async fn test_other_algorithms_rejected() {
        let auth = JwtAuthenticator::new(b"top-secret");
        let claims = Claims {
            sub: None,
            user_id: Some("100".to_string()),
            username: Some("alice".to_string()),
            ext: None,
            exp: chrono::Utc::now().timestamp() as u64 + 60,
            iat: 0,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"top-secret"),
        )
        .unwrap();
        assert!(matches!(auth.validate(&token).await, Err(AuthError::Invalid)));
    }
}
