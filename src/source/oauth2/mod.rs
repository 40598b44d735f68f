//! OAuth2 and OpenID Connect federation.
//!
//! The local side never sees a password. A browser is sent to the provider with a single-use
//! `state`, comes back with a code, and the code is traded for tokens and a profile. The profile
//! is linked to a local account through the external-login table, registering one on first use
//! when the source allows it.
mod flow;
mod provider;
mod registry;
mod sync;


use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::identity::{ExternalLogin, NewUser, User};
use crate::secret::Secret;
use crate::source::{Error, Source, SourceType};
use crate::store::{self, Stores};

pub use flow::{authorization_url, exchange, refresh, AuthorizationRequest, ProviderUser, TokenResponse};
pub use provider::{builtin_providers, Endpoints, Family, OpenIdConfiguration, Provider};
pub use registry::Registry;
pub use sync::{refresh_tokens, RefreshReport};

/// Endpoint overrides for self-hosted providers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomUrlMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub open_id_connect_auto_discovery_url: String,
    pub custom_url_mapping: Option<CustomUrlMapping>,
    pub scopes: Vec<String>,
    /// Create a local account the first time an unknown provider account signs in.
    pub auto_register: bool,
    /// The provider is trusted to have enforced a second factor.
    pub skip_local_two_fa: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: String::new(),
            client_id: String::new(),
            client_secret: Secret::default(),
            open_id_connect_auto_discovery_url: String::new(),
            custom_url_mapping: None,
            scopes: Vec::new(),
            auto_register: true,
            skip_local_two_fa: false,
        }
    }
}

fn local_name(provider_user: &ProviderUser) -> String {
    let candidate = if !provider_user.nick_name.is_empty() {
        provider_user.nick_name.as_str()
    } else if let Some((local, _)) = provider_user.email.split_once('@') {
        local
    } else {
        provider_user.user_id.as_str()
    };

    candidate
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Resolve the local account vouched for by `provider_user`, refreshing the stored link.
#[instrument(skip_all, fields(source = %source.name, external_id = %provider_user.user_id))]
pub async fn login(
    stores: &Stores,
    source: &Source,
    config: &Config,
    provider_user: &ProviderUser,
) -> Result<User, Error> {
    let link = match stores
        .external_logins
        .get_external_login(source.id, &provider_user.user_id)
        .await
    {
        Ok(link) => Some(link),
        Err(store::Error::NotFound) => None,
        Err(error) => return Err(error.into()),
    };

    let user = match link {
        Some(link) => stores.users.get_user_by_id(link.user_id).await?,
        None if config.auto_register => {
            let name = local_name(provider_user);
            let user = stores
                .users
                .create_user(NewUser {
                    full_name: if provider_user.name.is_empty() {
                        name.clone()
                    } else {
                        provider_user.name.clone()
                    },
                    name,
                    email: provider_user.email.clone(),
                    login_type: SourceType::OAuth2,
                    login_source: source.id,
                    login_name: provider_user.user_id.clone(),
                    is_active: true,
                    ..NewUser::default()
                })
                .await
                .map_err(|error| match error {
                    store::Error::Duplicate(what) => Error::AlreadyExists(what),
                    error => error.into(),
                })?;
            info!("Registered '{}' from OAuth2 source '{}'", user.name, source.name);
            user
        }
        None => return Err(Error::UserNotFound(provider_user.user_id.clone())),
    };

    stores
        .external_logins
        .upsert_external_login(&ExternalLogin {
            external_id: provider_user.user_id.clone(),
            user_id: user.id,
            login_source_id: source.id,
            provider: provider_user.provider.clone(),
            email: provider_user.email.clone(),
            access_token: provider_user.access_token.clone(),
            refresh_token: provider_user.refresh_token.clone(),
            expires_at: provider_user.expires_at,
        })
        .await?;

    if !user.can_sign_in() {
        return Err(Error::ProhibitLogin(user.name));
    }
    Ok(user)
}
