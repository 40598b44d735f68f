//! SPNEGO negotiation. A request may need several round trips: each unfinished step answers
//! with a continuation token that the client echoes back in its next `Authorization:
//! Negotiate` header.
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::method::allowed;
use crate::auth::{AuthRequest, Credential, Error, HeaderExt, Method, Verified};
use crate::identity::{NewUser, ResponseHint};
use crate::source::{SourceConfig, SourceType, Sources};
use crate::store;

const LOGIN_PATH: &str = "/user/login";

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Send `0` back to the client and wait for its next token.
    Continue(Vec<u8>),
    /// The client proved `principal`; `1` is the final server token, possibly empty.
    Complete { principal: String, output: Vec<u8> },
}

/// Server side of the security context negotiation.
#[cfg_attr(test, mockall::automock)]
pub trait Negotiator: Send + Sync {
    fn accept(&self, token: &[u8]) -> Result<Step, String>;
}

/// The negotiation package of the host. Only Windows hosts ship one.
pub fn host_negotiator() -> Result<Arc<dyn Negotiator>, String> {
    Err("no SSPI security package is available on this host".to_string())
}

type Factory = Box<dyn Fn() -> Result<Arc<dyn Negotiator>, String> + Send + Sync>;

pub struct Sspi {
    sources: Arc<Sources>,
    handle: OnceCell<Arc<dyn Negotiator>>,
    factory: Factory,
}

impl Sspi {
    pub fn new(sources: Arc<Sources>) -> Self {
        Self {
            sources,
            handle: OnceCell::new(),
            factory: Box::new(host_negotiator),
        }
    }

    pub fn with_negotiator(sources: Arc<Sources>, negotiator: Arc<dyn Negotiator>) -> Self {
        Self {
            sources,
            handle: OnceCell::new_with(Some(negotiator.clone())),
            factory: Box::new(move || Ok(negotiator.clone())),
        }
    }

    async fn negotiator(&self) -> Result<&Arc<dyn Negotiator>, Error> {
        self.handle
            .get_or_try_init(|| async { (self.factory)().map_err(Error::Unavailable) })
            .await
    }
}

#[async_trait]
impl Method for Sspi {
    fn name(&self) -> &'static str {
        "sspi"
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        matches!(request.parts.authorization(), Some(Credential::Spnego(_)))
            || request.path() == LOGIN_PATH
    }

    async fn init(&self) -> Result<(), Error> {
        self.negotiator().await.map(|_| ())
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some(source) = self
            .sources
            .active(SourceType::Sspi)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        let SourceConfig::Sspi(config) = &source.config else {
            return Ok(None);
        };

        let Some(Credential::Spnego(token)) = request.parts.authorization() else {
            debug!("Asking the client to start SPNEGO negotiation");
            return Err(Error::Challenge(String::new()));
        };

        let negotiator = self.negotiator().await?;
        let (principal, output) = match negotiator.accept(&token) {
            Ok(Step::Continue(output)) => {
                return Err(Error::Challenge(BASE64_STANDARD.encode(output)));
            }
            Ok(Step::Complete { principal, output }) => (principal, output),
            Err(err) => return Err(Error::Invalid(format!("negotiation failed: {err}"))),
        };

        let name = config.user_name(&principal);
        let users = &self.sources.stores().users;
        let user = match users.get_user_by_name(&name).await {
            Ok(user) => allowed(user)?,
            Err(store::Error::NotFound) if config.auto_create_users => {
                let user = users
                    .create_user(NewUser {
                        name: name.clone(),
                        email: format!("{name}@localhost"),
                        login_type: SourceType::Sspi,
                        login_source: source.id,
                        login_name: principal.clone(),
                        is_active: config.auto_activate_users,
                        ..NewUser::default()
                    })
                    .await?;
                info!("Created user '{name}' for principal '{principal}'");
                allowed(user)?
            }
            Err(store::Error::NotFound) => {
                debug!("No local user for principal '{principal}'");
                return Err(Error::NotFound);
            }
            Err(error) => return Err(error.into()),
        };

        let mut verified = Verified::user(user);
        if !output.is_empty() {
            verified
                .hints
                .push(ResponseHint::Negotiate(BASE64_STANDARD.encode(output)));
        }
        Ok(Some(verified))
    }
}
