//! Authorization code flow against a registered provider.
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{self, Cache};
use crate::signing::JwkSet;
use crate::source::oauth2::provider::{profile_fields, Family, Provider};
use crate::source::oauth2::Registry;
use crate::source::Error;

const STATE_TTL: u64 = 600;
const JWKS_TTL: u64 = 3600;
const ID_TOKEN_LEEWAY: u64 = 60;

/// Where to send the browser, and the single-use `state` bound to it.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Identity and tokens returned by a provider at the end of the flow.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderUser {
    pub source_name: String,
    pub provider: String,
    pub user_id: String,
    pub nick_name: String,
    pub name: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Tokens from a successful token endpoint call.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs))
    }
}

fn state_key(state: &str) -> String {
    format!("oauth2:state:{state}")
}

pub async fn authorization_url(
    registry: &Registry,
    source_name: &str,
) -> Result<AuthorizationRequest, Error> {
    let provider = registry.get(source_name).await?;
    let state = Uuid::new_v4().simple().to_string();
    registry
        .cache()
        .store_value(&state_key(&state), source_name, STATE_TTL)
        .await?;

    let query = serde_urlencoded::to_string([
        ("response_type", "code"),
        ("client_id", provider.client_id.as_str()),
        ("redirect_uri", registry.redirect_uri(source_name).as_str()),
        ("scope", provider.scopes.join(" ").as_str()),
        ("state", state.as_str()),
    ])
    .map_err(|e| Error::Provider(format!("Unable to encode authorization URL: {e}")))?;

    let separator = if provider.endpoints.auth_url.contains('?') {
        '&'
    } else {
        '?'
    };
    Ok(AuthorizationRequest {
        url: format!("{}{separator}{query}", provider.endpoints.auth_url),
        state,
    })
}

/// Consume `state`, trade `code` for tokens and resolve the provider account.
#[instrument(skip(registry, code))]
pub async fn exchange(
    registry: &Registry,
    source_name: &str,
    state: &str,
    code: &str,
) -> Result<ProviderUser, Error> {
    match registry.cache().take_value(&state_key(state)).await? {
        Some(bound) if bound == source_name => {}
        Some(bound) => {
            warn!("OAuth2 state issued for '{bound}' presented to '{source_name}'");
            return Err(Error::Provider("state does not match provider".to_string()));
        }
        None => return Err(Error::Provider("unknown or expired state".to_string())),
    }

    let provider = registry.get(source_name).await?;
    let redirect_uri = registry.redirect_uri(source_name);
    let tokens = token_request(
        registry,
        &provider,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
        ],
    )
    .await?;

    let profile = match (&provider.family, tokens.id_token.as_deref()) {
        (Family::OpenIdConnect, Some(id_token)) => {
            verify_id_token(registry, &provider, id_token).await?
        }
        _ => fetch_profile(registry, &provider, &tokens.access_token).await?,
    };

    let mut fields = profile_fields(&profile);
    if fields.user_id.is_empty() {
        return Err(Error::Provider("profile has no user id".to_string()));
    }
    if fields.email.is_empty() {
        if let Some(email_url) = &provider.endpoints.email_url {
            fields.email = fetch_primary_email(registry, email_url, &tokens.access_token).await?;
        }
    }

    info!("Provider '{source_name}' vouched for account {}", fields.user_id);
    Ok(ProviderUser {
        source_name: source_name.to_string(),
        provider: provider.kind.to_string(),
        user_id: fields.user_id,
        nick_name: fields.nick_name,
        name: fields.name,
        email: fields.email,
        expires_at: tokens.expires_at(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.unwrap_or_default(),
        id_token: tokens.id_token.unwrap_or_default(),
    })
}

/// Trade a refresh token for a new access token.
pub async fn refresh(
    registry: &Registry,
    provider: &Provider,
    refresh_token: &str,
) -> Result<TokenResponse, Error> {
    token_request(
        registry,
        provider,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ],
    )
    .await
}

async fn token_request(
    registry: &Registry,
    provider: &Provider,
    params: &[(&str, &str)],
) -> Result<TokenResponse, Error> {
    let mut form: Vec<(&str, &str)> = params.to_vec();
    form.push(("client_id", provider.client_id.as_str()));
    form.push(("client_secret", provider.client_secret.expose().as_str()));

    let response = registry
        .client()
        .post(&provider.endpoints.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    let body: Value = response.json().await?;

    // Some providers answer 200 with an error document.
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(token_error(error, &body));
    }
    if !status.is_success() {
        return Err(Error::Provider(format!("token endpoint returned HTTP {status}")));
    }

    serde_json::from_value(body)
        .map_err(|e| Error::Provider(format!("invalid token response: {e}")))
}

fn token_error(error: &str, body: &Value) -> Error {
    if error == "invalid_grant" {
        return Error::InvalidGrant;
    }
    let description = body
        .get("error_description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Error::Provider(format!("{error}: {description}"))
}

async fn fetch_profile(
    registry: &Registry,
    provider: &Provider,
    access_token: &str,
) -> Result<HashMap<String, Value>, Error> {
    if provider.endpoints.profile_url.is_empty() {
        return Err(Error::Provider("provider has no profile endpoint".to_string()));
    }

    let response = registry
        .client()
        .get(&provider.endpoints.profile_url)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Provider(format!(
            "profile endpoint returned HTTP {}",
            response.status()
        )));
    }
    Ok(response.json().await?)
}

#[derive(Deserialize)]
struct EmailEntry {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

async fn fetch_primary_email(
    registry: &Registry,
    email_url: &str,
    access_token: &str,
) -> Result<String, Error> {
    let response = registry
        .client()
        .get(email_url)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        debug!("Email endpoint returned HTTP {}", response.status());
        return Ok(String::new());
    }

    let entries: Vec<EmailEntry> = response.json().await?;
    Ok(entries
        .into_iter()
        .find(|entry| entry.primary && entry.verified)
        .map(|entry| entry.email)
        .unwrap_or_default())
}

async fn verify_id_token(
    registry: &Registry,
    provider: &Provider,
    id_token: &str,
) -> Result<HashMap<String, Value>, Error> {
    let Some(openid) = &provider.openid else {
        return Err(Error::Provider("provider has no OpenID configuration".to_string()));
    };

    let header = decode_header(id_token)
        .map_err(|e| Error::Provider(format!("Failed to decode ID token header: {e}")))?;
    let jwks = fetch_jwks(registry.client(), registry.cache(), &openid.jwks_uri).await?;

    let jwk = match header.kid.as_deref() {
        Some(kid) => jwks.keys.iter().find(|key| key.kid() == Some(kid)),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
    .ok_or_else(|| Error::Provider(format!("No matching key found for kid: {:?}", header.kid)))?;

    let decoding_key = jwk
        .to_decoding_key()
        .map_err(|e| Error::Provider(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[&openid.issuer]);
    validation.set_audience(&[&provider.client_id]);
    validation.leeway = ID_TOKEN_LEEWAY;

    let token = decode::<HashMap<String, Value>>(id_token, &decoding_key, &validation)
        .map_err(|e| {
            warn!("ID token validation failed: {e}");
            Error::Provider(format!("ID token validation failed: {e}"))
        })?;
    Ok(token.claims)
}

async fn fetch_jwks(
    client: &reqwest::Client,
    cache: &dyn Cache,
    jwks_uri: &str,
) -> Result<JwkSet, Error> {
    let cache_key = format!("oauth2:jwks:{jwks_uri}");
    if let Ok(Some(jwks)) = cache::retrieve::<JwkSet>(cache, &cache_key).await {
        return Ok(jwks);
    }

    let response = client
        .get(jwks_uri)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Unavailable(format!(
            "Failed to fetch JWKS: HTTP {}",
            response.status()
        )));
    }

    let jwks: JwkSet = response.json().await?;
    let _ = cache::store(cache, &cache_key, &jwks, JWKS_TTL).await;
    info!("Fetched and cached JWKS from {jwks_uri}");
    Ok(jwks)
}
