mod access_token;
mod basic;
mod httpsign;
mod jwt;
mod oauth2;
mod reverse_proxy;
mod session;
pub mod sspi;

use std::sync::Arc;

use crate::auth::{Error, Verified};
use crate::identity::User;
use crate::store::UserStore;
use crate::token::{looks_like_access_token, AccessTokens, Grants};

pub use access_token::AccessTokenMethod;
pub use basic::Basic;
pub use httpsign::{HttpSign, HttpSignConfig};
pub use jwt::{issue_service_token, Jwt, ServiceClaims};
pub use oauth2::OAuth2;
pub use reverse_proxy::{Cidr, ReverseProxy, ReverseProxyConfig};
pub use session::{RememberMe, Session, SESSION_USER_KEY};
pub use sspi::{Negotiator, Sspi, Step};

fn allowed(user: User) -> Result<User, Error> {
    if user.can_sign_in() {
        Ok(user)
    } else {
        Err(Error::Prohibited(user.name))
    }
}

/// Resolves bearer material that is either an OAuth2 grant JWT or a personal access token.
#[derive(Clone)]
pub struct TokenVerifier {
    users: Arc<dyn UserStore>,
    access_tokens: Arc<AccessTokens>,
    grants: Option<Arc<Grants>>,
}

impl TokenVerifier {
    pub fn new(
        users: Arc<dyn UserStore>,
        access_tokens: Arc<AccessTokens>,
        grants: Option<Arc<Grants>>,
    ) -> Self {
        Self {
            users,
            access_tokens,
            grants,
        }
    }

    /// `Ok(None)` when `token` has neither shape.
    pub async fn resolve(&self, token: &str) -> Result<Option<Verified>, Error> {
        if token.contains('.') {
            let Some(grants) = &self.grants else {
                return Ok(None);
            };
            let grant = grants.verify_access_token(token).await?;
            let scope = Grants::scope_of(&grant)?;
            let user = allowed(self.users.get_user_by_id(grant.user_id).await?)?;
            return Ok(Some(Verified::api_token(user, scope)));
        }

        self.resolve_access_token(token).await
    }

    pub async fn resolve_access_token(&self, token: &str) -> Result<Option<Verified>, Error> {
        if !looks_like_access_token(token) {
            return Ok(None);
        }
        let access_token = self.access_tokens.verify(token).await?;
        let user = allowed(self.users.get_user_by_id(access_token.user_id).await?)?;
        Ok(Some(Verified::api_token(user, access_token.scope)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use hyper::http::request::{Builder, Parts};

    use super::TokenVerifier;
    use crate::identity::{NewUser, User};
    use crate::signing::{Algorithm, SigningKey};
    use crate::store::{MemoryStore, Stores};
    use crate::token::{AccessTokens, Grants};

    pub fn parts(builder: Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    pub fn stores() -> (Arc<MemoryStore>, Stores) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Stores::memory(store))
    }

    pub async fn user(stores: &Stores, name: &str) -> User {
        stores
            .users
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                is_active: true,
                ..NewUser::default()
            })
            .await
            .unwrap()
    }

    pub struct Tokens {
        pub verifier: TokenVerifier,
        pub access_tokens: Arc<AccessTokens>,
        pub grants: Arc<Grants>,
    }

    pub fn tokens(stores: &Stores) -> Tokens {
        let key = SigningKey::from_secret(Algorithm::HS256, b"method-test-signing-secret");
        let access_tokens = Arc::new(AccessTokens::new(stores.access_tokens.clone()));
        let grants = Arc::new(Grants::new(
            stores.grants.clone(),
            Arc::new(key),
            TimeDelta::hours(1),
            TimeDelta::days(30),
        ));
        Tokens {
            verifier: TokenVerifier::new(
                stores.users.clone(),
                access_tokens.clone(),
                Some(grants.clone()),
            ),
            access_tokens,
            grants,
        }
    }
}
