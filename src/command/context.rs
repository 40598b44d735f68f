use std::sync::Arc;

use argon2::PasswordHash;
use chrono::TimeDelta;
use tracing::{info, warn};

use crate::auth::method::{
    AccessTokenMethod, Basic, HttpSign, Jwt, OAuth2, RememberMe, ReverseProxy, Session, Sspi,
    TokenVerifier,
};
use crate::auth::{Group, Method};
use crate::command::Error;
use crate::configuration::{Configuration, MethodEntry, MethodName, UserEntry};
use crate::identity::NewUser;
use crate::signing::SigningKey;
use crate::source::{oauth2, SecretBox, SourceType, Sources};
use crate::store::{self, MemoryStore, Stores};
use crate::token::{AccessTokens, AuthTokens, Grants};

/// Everything the subcommands share, wired from one configuration.
pub struct Context {
    pub config: Configuration,
    pub stores: Stores,
    pub sources: Arc<Sources>,
    pub signing_key: Arc<SigningKey>,
    pub auth_tokens: Arc<AuthTokens>,
    pub access_tokens: Arc<AccessTokens>,
    pub grants: Arc<Grants>,
}

impl Context {
    pub async fn build(config: Configuration) -> Result<Self, Error> {
        let stores = Stores::memory(Arc::new(MemoryStore::new()));
        let cache = config.cache.to_backend()?;

        let callback_base = format!(
            "{}/user/oauth2",
            config.server.public_url.trim_end_matches('/')
        );
        let oauth2 = Arc::new(oauth2::Registry::new(cache, &callback_base)?);
        let secret_box = SecretBox::new(config.security.secret_key.expose());
        let sources = Arc::new(Sources::new(stores.clone(), secret_box, oauth2));

        let signing_key = Arc::new(SigningKey::load_or_generate(&config.signing)?);
        let auth_tokens = Arc::new(AuthTokens::new(
            stores.auth_tokens.clone(),
            TimeDelta::days(config.server.remember_me_days),
        ));
        let access_tokens = Arc::new(AccessTokens::new(stores.access_tokens.clone()));
        let grants = Arc::new(Grants::new(
            stores.grants.clone(),
            signing_key.clone(),
            TimeDelta::seconds(config.auth.grants.access_token_ttl),
            TimeDelta::seconds(config.auth.grants.refresh_token_ttl),
        ));

        let context = Self {
            config,
            stores,
            sources,
            signing_key,
            auth_tokens,
            access_tokens,
            grants,
        };
        context.seed_users().await?;
        context.register_sources().await?;
        Ok(context)
    }

    async fn seed_users(&self) -> Result<(), Error> {
        for (name, entry) in &self.config.users {
            if let Err(error) = PasswordHash::new(&entry.password) {
                return Err(Error::Initialization(format!(
                    "Password of user '{name}' is not an argon2 hash: {error}"
                )));
            }

            match self.stores.users.create_user(new_user(name, entry)).await {
                Ok(user) => info!("Seeded local user '{}'", user.name),
                Err(store::Error::Duplicate(_)) => warn!("User '{name}' already exists"),
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    async fn register_sources(&self) -> Result<(), Error> {
        for entry in &self.config.sources {
            let source = entry.to_source()?;
            if let Err(error) = self.sources.create(source).await {
                warn!("Identity source '{}' not loaded: {error}", entry.name);
            }
        }
        Ok(())
    }

    fn method(&self, name: MethodName) -> Arc<dyn Method> {
        let server = &self.config.server;
        let verifier = TokenVerifier::new(
            self.stores.users.clone(),
            self.access_tokens.clone(),
            Some(self.grants.clone()),
        );

        match name {
            MethodName::Session => {
                let remember = RememberMe::new(
                    self.auth_tokens.clone(),
                    &server.remember_cookie,
                    TimeDelta::days(server.remember_me_days),
                );
                Arc::new(
                    Session::new(self.stores.clone(), &server.session_cookie)
                        .with_remember_me(remember),
                )
            }
            MethodName::Basic => Arc::new(Basic::new(self.sources.clone(), verifier)),
            MethodName::AccessToken => Arc::new(AccessTokenMethod::new(verifier)),
            MethodName::OAuth2 => Arc::new(OAuth2::new(verifier)),
            MethodName::Jwt => Arc::new(Jwt::new(self.signing_key.clone())),
            MethodName::HttpSign => Arc::new(HttpSign::new(
                self.stores.clone(),
                self.config.auth.httpsign.clone(),
            )),
            MethodName::ReverseProxy => Arc::new(ReverseProxy::new(
                self.stores.users.clone(),
                self.config.auth.reverse_proxy.clone(),
            )),
            MethodName::Sspi => Arc::new(Sspi::new(self.sources.clone())),
        }
    }

    /// Build the method chain in configured order and initialize it.
    pub async fn build_group(&self) -> Group {
        let mut group = Group::new();
        for entry in &self.config.auth.methods {
            match entry {
                MethodEntry::Single(name) => group.register(self.method(*name)),
                MethodEntry::Shortcut(names) => {
                    group.register_shortcut(names.iter().map(|name| self.method(*name)).collect());
                }
            }
        }

        group.init().await;
        info!("Authentication chain: {:?}", group.names());
        group
    }
}

fn new_user(name: &str, entry: &UserEntry) -> NewUser {
    let email = if entry.email.is_empty() {
        format!("{}@localhost", name.to_lowercase())
    } else {
        entry.email.to_lowercase()
    };
    let full_name = if entry.full_name.is_empty() {
        name.to_string()
    } else {
        entry.full_name.clone()
    };

    NewUser {
        name: name.to_string(),
        full_name,
        email,
        passwd: entry.password.clone(),
        login_type: SourceType::Plain,
        is_active: true,
        is_admin: entry.admin,
        ..NewUser::default()
    }
}
