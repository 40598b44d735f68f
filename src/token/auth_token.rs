use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::store::AuthTokenStore;
use crate::token::{random_alphanumeric, random_hex, sha256_hex, Error};

const ID_LENGTH: usize = 16;
const SECRET_BYTES: usize = 32;

/// Long-lived sign-in token. Only the SHA-256 of the secret is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthToken {
    pub id: String,
    pub token_hash: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthTokens {
    store: Arc<dyn AuthTokenStore>,
    lifetime: TimeDelta,
}

impl AuthTokens {
    pub fn new(store: Arc<dyn AuthTokenStore>, lifetime: TimeDelta) -> Self {
        Self { store, lifetime }
    }

    /// Create a token for `user_id`. The returned `id:secret` string is never stored.
    pub async fn create(&self, user_id: i64) -> Result<(AuthToken, String), Error> {
        let (secret, token_hash) = generate_secret();
        let token = AuthToken {
            id: random_alphanumeric(ID_LENGTH),
            token_hash,
            user_id,
            expires_at: Utc::now() + self.lifetime,
        };

        self.store.insert_auth_token(&token).await?;
        let presented = format!("{}:{secret}", token.id);
        Ok((token, presented))
    }

    pub async fn check(&self, presented: &str) -> Result<AuthToken, Error> {
        let Some((id, secret)) = presented.split_once(':') else {
            return Err(Error::Malformed);
        };
        if id.is_empty() || secret.is_empty() {
            return Err(Error::Malformed);
        }

        let token = match self.store.get_auth_token(id).await {
            Ok(token) => token,
            Err(crate::store::Error::NotFound) => return Err(Error::Expired),
            Err(error) => return Err(error.into()),
        };

        if token.expires_at < Utc::now() {
            debug!("Auth token {id} expired at {}", token.expires_at);
            return Err(Error::Expired);
        }

        let hashed = sha256_hex(&[secret.as_bytes()]);
        if !bool::from(hashed.as_bytes().ct_eq(token.token_hash.as_bytes())) {
            return Err(Error::InvalidHash);
        }

        Ok(token)
    }

    /// Issue a new secret for the same id. The previous secret stops verifying.
    pub async fn regenerate(&self, token: &AuthToken) -> Result<(AuthToken, String), Error> {
        let (secret, token_hash) = generate_secret();
        let rotated = AuthToken {
            id: token.id.clone(),
            token_hash,
            user_id: token.user_id,
            expires_at: Utc::now() + self.lifetime,
        };

        self.store.update_auth_token(&rotated).await?;
        let presented = format!("{}:{secret}", rotated.id);
        Ok((rotated, presented))
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        Ok(self.store.delete_auth_token(id).await?)
    }

    pub async fn delete_expired(&self) -> Result<usize, Error> {
        let removed = self.store.delete_expired_auth_tokens(Utc::now()).await?;
        if removed > 0 {
            info!("Removed {removed} expired auth tokens");
        }
        Ok(removed)
    }
}

fn generate_secret() -> (String, String) {
    let secret = random_hex(SECRET_BYTES);
    let hash = sha256_hex(&[secret.as_bytes()]);
    (secret, hash)
}
