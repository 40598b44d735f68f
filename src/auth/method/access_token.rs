use async_trait::async_trait;

use crate::auth::method::TokenVerifier;
use crate::auth::{path, AuthRequest, Credential, Error, HeaderExt, Method, Verified};

/// Personal access token carried in a Basic credential, in either field.
pub struct AccessTokenMethod {
    tokens: TokenVerifier,
}

impl AccessTokenMethod {
    pub fn new(tokens: TokenVerifier) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Method for AccessTokenMethod {
    fn name(&self) -> &'static str {
        "access_token"
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        path::is_credential_bearing(request.path()) && request.parts.basic_auth().is_some()
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some((login, password)) = request.parts.basic_auth() else {
            return Ok(None);
        };
        let token = if Credential::is_token_as_username(&password) {
            login
        } else {
            password
        };
        self.tokens.resolve_access_token(&token).await
    }
}
