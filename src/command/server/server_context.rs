use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::http::request::Parts;
use tracing::instrument;

use crate::auth::{Authenticator, Group, Resolution};
use crate::command::server::Error;
use crate::command::Context;
use crate::signing::{JwkSet, SigningKey};

/// Per-process state shared by every connection.
pub struct ServerContext {
    group: Arc<Group>,
    web: Authenticator,
    api: Authenticator,
    pub signing_key: Arc<SigningKey>,
}

impl ServerContext {
    pub async fn new(context: &Context) -> Self {
        let group = Arc::new(context.build_group().await);
        let timeout = Duration::from_millis(context.config.server.auth_timeout_ms);

        Self {
            web: Authenticator::auth(group.clone(), timeout),
            api: Authenticator::api_auth(group.clone(), timeout),
            group,
            signing_key: context.signing_key.clone(),
        }
    }

    /// Browser routes: a refused credential leaves the request anonymous.
    #[instrument(skip(self, parts))]
    pub async fn authenticate(
        &self,
        parts: &Parts,
        remote_address: Option<SocketAddr>,
    ) -> Result<Resolution, Error> {
        Ok(self.web.authenticate(parts, remote_address).await?)
    }

    /// API routes: a refused credential or a missing identity is a 401.
    #[instrument(skip(self, parts))]
    pub async fn authenticate_api(
        &self,
        parts: &Parts,
        remote_address: Option<SocketAddr>,
    ) -> Result<Resolution, Error> {
        let resolution = self.api.authenticate(parts, remote_address).await?;
        if resolution.identity.is_none() {
            return Err(Error::Unauthorized {
                reason: "authentication required".to_string(),
                challenge: None,
            });
        }
        Ok(resolution)
    }

    pub fn jwk_set(&self) -> JwkSet {
        JwkSet {
            keys: self.signing_key.jwk().cloned().into_iter().collect(),
        }
    }

    pub async fn shutdown(&self) {
        self.group.free().await;
    }
}
