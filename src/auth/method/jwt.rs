use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::method::oauth2::bearer;
use crate::auth::{path, AuthRequest, Error, Method, Verified};
use crate::identity::User;
use crate::signing::{self, SigningKey};
use crate::token::AccessTokenScope;

/// Claims of a token this service issues to automation, such as CI runners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub sub: String,
    pub scp: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn issue_service_token(
    key: &SigningKey,
    subject: &str,
    scope: &AccessTokenScope,
    ttl: TimeDelta,
) -> Result<String, signing::Error> {
    let now = Utc::now();
    key.sign(&ServiceClaims {
        sub: subject.to_string(),
        scp: scope.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    })
}

/// Application-issued tokens embedded in download URLs.
pub struct Jwt {
    key: Arc<SigningKey>,
}

impl Jwt {
    pub fn new(key: Arc<SigningKey>) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Method for Jwt {
    fn name(&self) -> &'static str {
        "jwt"
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        path::is_token_download(request.path())
            && bearer(request).is_some_and(|token| token.contains('.'))
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some(token) = bearer(request) else {
            return Ok(None);
        };
        let claims: ServiceClaims = self.key.verify(&token)?;
        if claims.sub.is_empty() {
            return Err(Error::Invalid("service token without subject".to_string()));
        }
        let scope = AccessTokenScope::parse(&claims.scp)?;
        Ok(Some(Verified::api_token(User::service(&claims.sub), scope)))
    }
}
