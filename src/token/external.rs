use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::{self, AuthTokenStore, ExternalAuthTokenStore, SessionStore};
use crate::token::Error;

/// Provider tokens obtained during a federated sign-in, bound to the browser session and
/// optionally to the remember-me token created alongside it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalAuthToken {
    pub session_id: String,
    pub auth_token_id: Option<String>,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct ExternalAuthTokens {
    store: Arc<dyn ExternalAuthTokenStore>,
    sessions: Arc<dyn SessionStore>,
    auth_tokens: Arc<dyn AuthTokenStore>,
}

impl ExternalAuthTokens {
    pub fn new(
        store: Arc<dyn ExternalAuthTokenStore>,
        sessions: Arc<dyn SessionStore>,
        auth_tokens: Arc<dyn AuthTokenStore>,
    ) -> Self {
        Self {
            store,
            sessions,
            auth_tokens,
        }
    }

    pub async fn bind(&self, token: ExternalAuthToken) -> Result<(), Error> {
        debug!(
            "Binding {} provider tokens to session {}",
            token.provider, token.session_id
        );
        Ok(self.store.put_external_auth_token(&token).await?)
    }

    pub async fn get(&self, session_id: &str) -> Result<ExternalAuthToken, Error> {
        Ok(self.store.get_external_auth_token(session_id).await?)
    }

    /// Remove entries whose session is gone and whose paired auth token is missing or expired.
    pub async fn collect_garbage(&self) -> Result<usize, Error> {
        let now = Utc::now();
        let mut removed = 0;

        for token in self.store.list_external_auth_tokens().await? {
            if self.sessions.exists(&token.session_id).await? {
                continue;
            }

            if let Some(auth_token_id) = &token.auth_token_id {
                match self.auth_tokens.get_auth_token(auth_token_id).await {
                    Ok(auth_token) if auth_token.expires_at > now => continue,
                    Ok(_) | Err(store::Error::NotFound) => {}
                    Err(error) => return Err(error.into()),
                }
            }

            self.store
                .delete_external_auth_token(&token.session_id)
                .await?;
            removed += 1;
        }

        if removed > 0 {
            info!("Removed {removed} orphaned external auth tokens");
        }
        Ok(removed)
    }
}
