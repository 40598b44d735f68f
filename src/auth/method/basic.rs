use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::auth::method::TokenVerifier;
use crate::auth::{path, AuthRequest, Credential, Error, HeaderExt, Method, Verified};
use crate::source::Sources;

/// `Authorization: Basic` with a password, or with a token in the user name.
pub struct Basic {
    sources: Arc<Sources>,
    tokens: TokenVerifier,
}

impl Basic {
    pub fn new(sources: Arc<Sources>, tokens: TokenVerifier) -> Self {
        Self { sources, tokens }
    }
}

#[async_trait]
impl Method for Basic {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        path::is_credential_bearing(request.path()) && request.parts.basic_auth().is_some()
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some((login, password)) = request.parts.basic_auth() else {
            return Ok(None);
        };

        if Credential::is_token_as_username(&password) {
            debug!("Basic credential carries a token in the user name");
            return match self.tokens.resolve(&login).await? {
                Some(verified) => Ok(Some(verified)),
                None => Err(Error::NotFound),
            };
        }

        let user = self
            .sources
            .sign_in(&login, &password, &request.cancel)
            .await?;
        let skip_local_two_fa = self.sources.skips_local_two_fa(&user).await;
        if user.two_factor_enabled && !skip_local_two_fa {
            debug!("Refusing password authentication for '{}' with two-factor enabled", user.name);
            return Err(Error::Prohibited(user.name));
        }
        Ok(Some(Verified {
            skip_local_two_fa,
            ..Verified::user(user)
        }))
    }
}

#[cfg(test)]
mod tests {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use hyper::header::AUTHORIZATION;
    use hyper::Request;

    use super::*;
    use crate::auth::method::testing::{parts, stores, tokens, user};
    use crate::cache::memory::Backend;
    use crate::identity::{NewUser, UserColumn};
    use crate::source::{db, oauth2, SecretBox};
    use crate::store::Stores;
    use crate::token::AccessTokenScope;

    fn sources(stores: &Stores) -> Arc<Sources> {
        let registry = oauth2::Registry::new(
            Arc::new(Backend::new()),
            "https://forge.example.com/user/oauth2",
        )
        .unwrap();
        let sources = Sources::new(
            stores.clone(),
            SecretBox::new("test-secret-key"),
            Arc::new(registry),
        );
        Arc::new(sources)
    }

    fn basic(stores: &Stores) -> Basic {
        Basic::new(sources(stores), tokens(stores).verifier)
    }

    fn header(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{pass}")))
    }

    async fn verify(
        method: &Basic,
        uri: &str,
        auth: &str,
    ) -> (bool, Result<Option<Verified>, Error>) {
        let parts = parts(Request::builder().uri(uri).header(AUTHORIZATION, auth));
        let request = AuthRequest::new(&parts, None);
        (method.is_applicable(&request), method.verify(&request).await)
    }

    async fn local_user(stores: &Stores, name: &str, password: &str) {
        stores
            .users
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                passwd: db::hash_password(password).unwrap(),
                is_active: true,
                ..NewUser::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_password_sign_in_on_api_path() {
        let (_, stores) = stores();
        local_user(&stores, "alice", "correct horse").await;
        let method = basic(&stores);

        let (applicable, result) =
            verify(&method, "/api/v1/user", &header("alice", "correct horse")).await;
        assert!(applicable);
        let verified = result.unwrap().unwrap();
        assert_eq!(verified.user.name, "alice");
        assert!(!verified.is_api_token);

        let (_, result) = verify(&method, "/api/v1/user", &header("alice", "wrong")).await;
        assert_eq!(result.unwrap_err(), Error::NotFound);
    }

    #[tokio::test]
    async fn test_not_applicable_outside_credential_paths() {
        let (_, stores) = stores();
        let method = basic(&stores);

        let (applicable, _) = verify(&method, "/explore/repos", &header("alice", "x")).await;
        assert!(!applicable);
        let (applicable, _) = verify(&method, "/api/v1/user", "Bearer abc").await;
        assert!(!applicable);
    }

    #[tokio::test]
    async fn test_two_factor_users_must_use_tokens() {
        let (_, stores) = stores();
        local_user(&stores, "alice", "correct horse").await;
        let mut alice = stores.users.get_user_by_name("alice").await.unwrap();
        alice.two_factor_enabled = true;
        stores
            .users
            .update_user_columns(&alice, &[UserColumn::TwoFactorEnabled])
            .await
            .unwrap();
        let method = basic(&stores);

        let (_, result) =
            verify(&method, "/api/v1/user", &header("alice", "correct horse")).await;
        assert_eq!(result.unwrap_err(), Error::Prohibited("alice".to_string()));
    }

    #[tokio::test]
    async fn test_token_as_user_name() {
        let (_, stores) = stores();
        let alice = user(&stores, "alice").await;
        let tokens = tokens(&stores);
        let (_, plaintext) = tokens
            .access_tokens
            .create(alice.id, "ci", AccessTokenScope::all())
            .await
            .unwrap();
        let method = Basic::new(sources(&stores), tokens.verifier);

        for password in ["", "x-oauth-basic"] {
            let (_, result) =
                verify(&method, "/owner/repo/info/refs", &header(&plaintext, password)).await;
            let verified = result.unwrap().unwrap();
            assert_eq!(verified.user.id, alice.id);
            assert!(verified.is_api_token);
        }

        let (_, result) = verify(&method, "/api/v1/user", &header("not-a-token", "")).await;
        assert_eq!(result.unwrap_err(), Error::NotFound);
    }
}
