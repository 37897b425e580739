use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::claims::Claims;
use super::jwt::classify;
use super::{AuthError, Authenticator, Identity};

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Signature algorithms accepted from a key set. The key's own family must
/// still match, so an RSA public key can never verify an HMAC token.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::HS256,
];

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies tokens against a JSON Web Key Set published at `url`.
///
/// Keys are cached for five minutes. An unknown `kid` forces one refresh so
/// key rotation is picked up without waiting for the cache to expire.
pub struct JwksAuthenticator {
    url: String,
    client: reqwest::Client,
    cache: ArcSwapOption<CachedKeys>,
    refresh_lock: Mutex<()>,
    ttl: Duration,
}

impl JwksAuthenticator {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            url: url.to_string(),
            client,
            cache: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            ttl: CACHE_TTL,
        }
    }

    async fn fetch(&self) -> Result<Arc<CachedKeys>, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(format!("JWKS request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Unavailable(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("invalid JWKS document: {e}")))?;

        tracing::debug!(url = %self.url, keys = keys.keys.len(), "refreshed JWKS");
        let cached = Arc::new(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        self.cache.store(Some(cached.clone()));
        Ok(cached)
    }

    fn lookup(cached: &CachedKeys, kid: &str) -> Option<Result<DecodingKey, AuthError>> {
        cached
            .keys
            .find(kid)
            .map(|jwk| DecodingKey::from_jwk(jwk).map_err(|_| AuthError::Invalid))
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(cached) = self.cache.load_full() {
            if cached.fetched_at.elapsed() < self.ttl {
                if let Some(key) = Self::lookup(&cached, kid) {
                    return key;
                }
            }
        }

        // One refresh at a time; whoever waited may find it already done.
        let _guard = self.refresh_lock.lock().await;
        if let Some(cached) = self.cache.load_full() {
            if cached.fetched_at.elapsed() < Duration::from_secs(1) {
                if let Some(key) = Self::lookup(&cached, kid) {
                    return key;
                }
            }
        }
        let cached = self.fetch().await?;
        Self::lookup(&cached, kid).unwrap_or(Err(AuthError::Invalid))
    }
}

#[async_trait]
impl Authenticator for JwksAuthenticator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::Invalid)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::Invalid);
        }
        let kid = header.kid.ok_or(AuthError::Invalid)?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation).map_err(classify)?;
        data.claims.into_identity()
    }
}
