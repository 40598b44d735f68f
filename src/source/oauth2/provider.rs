use std::collections::HashMap;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{self, Cache};
use crate::secret::Secret;
use crate::source::oauth2::Config;
use crate::source::Error;

const DISCOVERY_TTL: u64 = 3600;

/// How a provider's endpoints are found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// Fixed public endpoints.
    Simple,
    /// Self-hosted products: endpoints come from the source's URL mapping, falling back to the
    /// public instance.
    CustomUrl,
    /// Endpoints come from an OpenID Connect discovery document.
    OpenIdConnect,
}

struct Builtin {
    name: &'static str,
    display_name: &'static str,
    family: Family,
    auth_url: &'static str,
    token_url: &'static str,
    profile_url: &'static str,
    email_url: &'static str,
    discovery_url: &'static str,
    scopes: &'static [&'static str],
}

const BUILTIN: &[Builtin] = &[
    Builtin {
        name: "github",
        display_name: "GitHub",
        family: Family::CustomUrl,
        auth_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        profile_url: "https://api.github.com/user",
        email_url: "https://api.github.com/user/emails",
        discovery_url: "",
        scopes: &["read:user", "user:email"],
    },
    Builtin {
        name: "gitlab",
        display_name: "GitLab",
        family: Family::CustomUrl,
        auth_url: "https://gitlab.com/oauth/authorize",
        token_url: "https://gitlab.com/oauth/token",
        profile_url: "https://gitlab.com/api/v4/user",
        email_url: "",
        discovery_url: "",
        scopes: &["read_user"],
    },
    Builtin {
        name: "gitea",
        display_name: "Gitea",
        family: Family::CustomUrl,
        auth_url: "https://gitea.com/login/oauth/authorize",
        token_url: "https://gitea.com/login/oauth/access_token",
        profile_url: "https://gitea.com/api/v1/user",
        email_url: "",
        discovery_url: "",
        scopes: &[],
    },
    Builtin {
        name: "nextcloud",
        display_name: "Nextcloud",
        family: Family::CustomUrl,
        auth_url: "",
        token_url: "",
        profile_url: "",
        email_url: "",
        discovery_url: "",
        scopes: &[],
    },
    Builtin {
        name: "bitbucket",
        display_name: "Bitbucket",
        family: Family::Simple,
        auth_url: "https://bitbucket.org/site/oauth2/authorize",
        token_url: "https://bitbucket.org/site/oauth2/access_token",
        profile_url: "https://api.bitbucket.org/2.0/user",
        email_url: "",
        discovery_url: "",
        scopes: &["account", "email"],
    },
    Builtin {
        name: "discord",
        display_name: "Discord",
        family: Family::Simple,
        auth_url: "https://discord.com/api/oauth2/authorize",
        token_url: "https://discord.com/api/oauth2/token",
        profile_url: "https://discord.com/api/users/@me",
        email_url: "",
        discovery_url: "",
        scopes: &["identify", "email"],
    },
    Builtin {
        name: "google",
        display_name: "Google",
        family: Family::OpenIdConnect,
        auth_url: "",
        token_url: "",
        profile_url: "",
        email_url: "",
        discovery_url: "https://accounts.google.com/.well-known/openid-configuration",
        scopes: &[],
    },
    Builtin {
        name: "openidconnect",
        display_name: "OpenID Connect",
        family: Family::OpenIdConnect,
        auth_url: "",
        token_url: "",
        profile_url: "",
        email_url: "",
        discovery_url: "",
        scopes: &[],
    },
];

/// Names accepted in `provider`, with a human readable label.
pub fn builtin_providers() -> Vec<(&'static str, &'static str)> {
    BUILTIN
        .iter()
        .map(|builtin| (builtin.name, builtin.display_name))
        .collect()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub email_url: Option<String>,
}

/// A registered provider, ready to drive the authorization code flow.
#[derive(Debug)]
pub struct Provider {
    pub source_name: String,
    pub kind: &'static str,
    pub family: Family,
    pub client_id: String,
    pub(crate) client_secret: Secret<String>,
    pub endpoints: Endpoints,
    pub scopes: Vec<String>,
    pub openid: Option<OpenIdConfiguration>,
}

fn pick(custom: Option<&String>, default: &str, what: &str) -> Result<String, Error> {
    match custom.map(String::as_str).filter(|url| !url.is_empty()) {
        Some(url) => Ok(url.to_string()),
        None if !default.is_empty() => Ok(default.to_string()),
        None => Err(Error::Configuration(format!("{what} is required"))),
    }
}

impl Provider {
    pub async fn build(
        source_name: &str,
        config: &Config,
        client: &Client,
        cache: &dyn Cache,
    ) -> Result<Self, Error> {
        let builtin = BUILTIN
            .iter()
            .find(|builtin| builtin.name.eq_ignore_ascii_case(&config.provider))
            .ok_or_else(|| {
                Error::Configuration(format!("unknown OAuth2 provider '{}'", config.provider))
            })?;
        if config.client_id.is_empty() {
            return Err(Error::Configuration("client_id is required".to_string()));
        }

        let mut openid = None;
        let endpoints = match builtin.family {
            Family::Simple => Endpoints {
                auth_url: builtin.auth_url.to_string(),
                token_url: builtin.token_url.to_string(),
                profile_url: builtin.profile_url.to_string(),
                email_url: Some(builtin.email_url.to_string()).filter(|url| !url.is_empty()),
            },
            Family::CustomUrl => {
                let mapping = config.custom_url_mapping.clone().unwrap_or_default();
                let email_url = match &mapping.email_url {
                    Some(url) if !url.is_empty() => Some(url.clone()),
                    _ => Some(builtin.email_url.to_string()).filter(|url| !url.is_empty()),
                };
                Endpoints {
                    auth_url: pick(mapping.auth_url.as_ref(), builtin.auth_url, "auth_url")?,
                    token_url: pick(mapping.token_url.as_ref(), builtin.token_url, "token_url")?,
                    profile_url: pick(
                        mapping.profile_url.as_ref(),
                        builtin.profile_url,
                        "profile_url",
                    )?,
                    email_url,
                }
            }
            Family::OpenIdConnect => {
                let discovery_url = pick(
                    Some(&config.open_id_connect_auto_discovery_url),
                    builtin.discovery_url,
                    "open_id_connect_auto_discovery_url",
                )?;
                let discovered = discover(client, cache, &discovery_url).await?;
                let endpoints = Endpoints {
                    auth_url: discovered.authorization_endpoint.clone(),
                    token_url: discovered.token_endpoint.clone(),
                    profile_url: discovered.userinfo_endpoint.clone().unwrap_or_default(),
                    email_url: None,
                };
                openid = Some(discovered);
                endpoints
            }
        };

        let mut scopes = if config.scopes.is_empty() {
            builtin.scopes.iter().map(ToString::to_string).collect()
        } else {
            config.scopes.clone()
        };
        if builtin.family == Family::OpenIdConnect && !scopes.iter().any(|s| s == "openid") {
            scopes.insert(0, "openid".to_string());
        }

        debug!(
            "Built {} provider for source '{source_name}': {:?}",
            builtin.display_name, endpoints
        );
        Ok(Self {
            source_name: source_name.to_string(),
            kind: builtin.name,
            family: builtin.family,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            endpoints,
            scopes,
            openid,
        })
    }
}

async fn discover(
    client: &Client,
    cache: &dyn Cache,
    discovery_url: &str,
) -> Result<OpenIdConfiguration, Error> {
    let cache_key = format!("oauth2:discovery:{discovery_url}");
    if let Ok(Some(cached)) = cache::retrieve::<OpenIdConfiguration>(cache, &cache_key).await {
        return Ok(cached);
    }

    let response = client
        .get(discovery_url)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Configuration(format!(
            "OpenID discovery at {discovery_url} failed: HTTP {}",
            response.status()
        )));
    }

    let document: Value = response.json().await?;
    let configuration: OpenIdConfiguration = serde_json::from_value(document)
        .map_err(|e| Error::Configuration(format!("invalid OpenID discovery document: {e}")))?;
    if configuration.issuer.is_empty() {
        return Err(Error::Configuration(
            "OpenID discovery document has no issuer".to_string(),
        ));
    }

    let _ = cache::store(cache, &cache_key, &configuration, DISCOVERY_TTL).await;
    info!("Fetched OpenID configuration of {}", configuration.issuer);
    Ok(configuration)
}

/// Map a provider profile document onto the fields used for linking and registration.
pub(crate) fn profile_fields(profile: &HashMap<String, Value>) -> ProfileFields {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| match profile.get(*key) {
                Some(Value::String(value)) if !value.is_empty() => Some(value.clone()),
                Some(Value::Number(value)) => Some(value.to_string()),
                _ => None,
            })
            .unwrap_or_default()
    };

    ProfileFields {
        user_id: text(&["sub", "id", "uuid"]),
        nick_name: text(&["preferred_username", "login", "username", "nickname"]),
        name: text(&["name", "display_name", "global_name"]),
        email: text(&["email"]),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ProfileFields {
    pub user_id: String,
    pub nick_name: String,
    pub name: String,
    pub email: String,
}
