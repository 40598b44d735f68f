use std::sync::Arc;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::store::AccessTokenStore;
use crate::token::{random_alphanumeric, random_hex, sha256_hex, AccessTokenScope, Error};

const TOKEN_BYTES: usize = 20;
const TOKEN_LENGTH: usize = TOKEN_BYTES * 2;
const SALT_LENGTH: usize = 10;

/// Personal access token row. The plaintext is shown to its owner once at creation.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub token_hash: String,
    pub token_salt: String,
    pub token_last_eight: String,
    pub scope: AccessTokenScope,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

pub struct AccessTokens {
    store: Arc<dyn AccessTokenStore>,
}

/// Whether `value` has the shape of a personal access token.
pub fn looks_like_access_token(value: &str) -> bool {
    value.len() == TOKEN_LENGTH && value.bytes().all(|b| b.is_ascii_hexdigit())
}

impl AccessTokens {
    pub fn new(store: Arc<dyn AccessTokenStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: i64,
        name: &str,
        scope: AccessTokenScope,
    ) -> Result<(AccessToken, String), Error> {
        let plaintext = random_hex(TOKEN_BYTES);
        let token_salt = random_alphanumeric(SALT_LENGTH);

        let mut token = AccessToken {
            id: 0,
            user_id,
            name: name.to_string(),
            token_hash: hash_token(&token_salt, &plaintext),
            token_salt,
            token_last_eight: plaintext[TOKEN_LENGTH - 8..].to_string(),
            scope,
            created_at: Utc::now(),
            last_used_at: None,
        };
        token.id = self.store.insert_access_token(token.clone()).await?;

        Ok((token, plaintext))
    }

    pub async fn verify(&self, plaintext: &str) -> Result<AccessToken, Error> {
        if !looks_like_access_token(plaintext) {
            return Err(Error::NotFound);
        }
        let plaintext = plaintext.to_ascii_lowercase();

        let candidates = self
            .store
            .find_access_tokens_by_last_eight(&plaintext[TOKEN_LENGTH - 8..])
            .await?;

        for mut candidate in candidates {
            let hashed = hash_token(&candidate.token_salt, &plaintext);
            if bool::from(hashed.as_bytes().ct_eq(candidate.token_hash.as_bytes())) {
                let now = Utc::now();
                if let Err(error) = self.store.touch_access_token(candidate.id, now).await {
                    warn!("Unable to record access token use: {error}");
                }
                candidate.last_used_at = Some(now);
                return Ok(candidate);
            }
        }

        Err(Error::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), Error> {
        Ok(self.store.delete_access_token(id).await?)
    }
}

fn hash_token(salt: &str, plaintext: &str) -> String {
    sha256_hex(&[salt.as_bytes(), plaintext.as_bytes()])
}
