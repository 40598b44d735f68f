use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::method::allowed;
use crate::auth::{AuthRequest, Error, HeaderExt, Method, Verified};
use crate::identity::{ResponseHint, User};
use crate::store::{self, Stores};
use crate::token::{self, AuthTokens};

/// Session key holding the signed-in user id.
pub const SESSION_USER_KEY: &str = "uid";

/// Half-finished sign-in state that a fresh sign-in must not inherit.
const SIGN_IN_ADJACENT_KEYS: &[&str] = &["twofaUid", "twofaRemember", "linkAccount"];

pub struct RememberMe {
    tokens: Arc<AuthTokens>,
    cookie_name: String,
    lifetime: TimeDelta,
}

impl RememberMe {
    pub fn new(tokens: Arc<AuthTokens>, cookie_name: &str, lifetime: TimeDelta) -> Self {
        Self {
            tokens,
            cookie_name: cookie_name.to_string(),
            lifetime,
        }
    }
}

/// Resolves the user stored in the server side session, falling back to a remember-me cookie.
pub struct Session {
    stores: Stores,
    cookie_name: String,
    remember: Option<RememberMe>,
}

pub(crate) fn set_cookie(name: &str, value: &str, max_age: TimeDelta) -> String {
    format!(
        "{name}={value}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        max_age.num_seconds()
    )
}

impl Session {
    pub fn new(stores: Stores, cookie_name: &str) -> Self {
        Self {
            stores,
            cookie_name: cookie_name.to_string(),
            remember: None,
        }
    }

    pub fn with_remember_me(mut self, remember: RememberMe) -> Self {
        self.remember = Some(remember);
        self
    }

    async fn session_user(&self, session_id: &str) -> Result<Option<User>, Error> {
        let Some(uid) = self.stores.sessions.get(session_id, SESSION_USER_KEY).await? else {
            return Ok(None);
        };
        let id: i64 = uid
            .parse()
            .map_err(|_| Error::Malformed(format!("session user id '{uid}'")))?;

        match self.stores.users.get_user_by_id(id).await {
            Ok(user) => Ok(Some(user)),
            Err(store::Error::NotFound) => {
                debug!("Session references unknown user {id}, clearing it");
                self.stores
                    .sessions
                    .delete(session_id, SESSION_USER_KEY)
                    .await?;
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn auto_sign_in(
        &self,
        remember: &RememberMe,
        session_id: Option<String>,
        presented: &str,
        request: &AuthRequest<'_>,
    ) -> Result<Option<Verified>, Error> {
        let token_id = presented.split_once(':').map_or(presented, |(id, _)| id);

        let token = match remember.tokens.check(presented).await {
            Ok(token) => token,
            Err(token::Error::Expired | token::Error::NotFound | token::Error::Malformed) => {
                debug!("Discarding unusable remember-me token");
                if !token_id.is_empty() {
                    remember.tokens.delete(token_id).await?;
                }
                return Ok(None);
            }
            Err(token::Error::InvalidHash) => {
                warn!(
                    "Remember-me token {token_id} from {} has a wrong secret, it may have been \
                     stolen; deleting it",
                    request.remote()
                );
                remember.tokens.delete(token_id).await?;
                return Err(Error::InvalidHash);
            }
            Err(error) => return Err(error.into()),
        };

        let user = match self.stores.users.get_user_by_id(token.user_id).await {
            Ok(user) => allowed(user)?,
            Err(store::Error::NotFound) => {
                remember.tokens.delete(&token.id).await?;
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        let (_, rotated) = remember.tokens.regenerate(&token).await?;

        let mut hints = Vec::new();
        let session_id = match session_id {
            Some(id) if self.stores.sessions.exists(&id).await? => id,
            _ => {
                let id = Uuid::new_v4().simple().to_string();
                hints.push(ResponseHint::SetCookie(set_cookie(
                    &self.cookie_name,
                    &id,
                    remember.lifetime,
                )));
                id
            }
        };

        let sessions = &self.stores.sessions;
        sessions
            .set(&session_id, SESSION_USER_KEY, &user.id.to_string())
            .await?;
        for key in SIGN_IN_ADJACENT_KEYS {
            sessions.delete(&session_id, key).await?;
        }
        hints.push(ResponseHint::SetCookie(set_cookie(
            &remember.cookie_name,
            &rotated,
            remember.lifetime,
        )));

        debug!("Signed in '{}' from a remember-me token", user.name);
        Ok(Some(Verified {
            user,
            hints,
            ..Verified::default()
        }))
    }
}

#[async_trait]
impl Method for Session {
    fn name(&self) -> &'static str {
        "session"
    }

    fn is_applicable(&self, _request: &AuthRequest<'_>) -> bool {
        true
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let session_id = request.parts.cookie(&self.cookie_name);
        if let Some(session_id) = &session_id {
            if let Some(user) = self.session_user(session_id).await? {
                return allowed(user).map(|user| Some(Verified::user(user)));
            }
        }

        let Some(remember) = &self.remember else {
            return Ok(None);
        };
        let Some(presented) = request.parts.cookie(&remember.cookie_name) else {
            return Ok(None);
        };
        self.auto_sign_in(remember, session_id, &presented, request)
            .await
    }
}
