use async_trait::async_trait;

use crate::auth::method::TokenVerifier;
use crate::auth::{path, AuthRequest, Error, HeaderExt, Method, Verified};

/// Bearer tokens from `?token=`, `?access_token=` or `Authorization: token|bearer`.
pub struct OAuth2 {
    tokens: TokenVerifier,
}

impl OAuth2 {
    pub fn new(tokens: TokenVerifier) -> Self {
        Self { tokens }
    }
}

pub(crate) fn bearer(request: &AuthRequest<'_>) -> Option<String> {
    request
        .parts
        .query_param("token")
        .or_else(|| request.parts.query_param("access_token"))
        .or_else(|| request.parts.bearer_token())
}

#[async_trait]
impl Method for OAuth2 {
    fn name(&self) -> &'static str {
        "oauth2"
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        path::is_credential_bearing(request.path()) && bearer(request).is_some()
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some(token) = bearer(request) else {
            return Ok(None);
        };
        self.tokens.resolve(&token).await
    }
}
