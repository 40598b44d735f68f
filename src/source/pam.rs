//! PAM source. The host PAM stack is only linked in with the `pam` feature.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::identity::{NewUser, User};
use crate::source::{db, Error, Source, SourceType};
use crate::store::Stores;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PAM service, e.g. `system-auth`.
    pub service_name: String,
    /// When set, new users get `<name>@<email_domain>` instead of the PAM login as address.
    pub email_domain: String,
    pub skip_local_two_fa: bool,
}

/// Blocking conversation with a PAM stack that only answers the password prompt.
#[cfg_attr(test, mockall::automock)]
pub trait PamStack: Send + Sync {
    /// Returns the login name PAM settled on.
    fn authenticate(&self, service: &str, login: &str, password: &str) -> Result<String, String>;
}

#[cfg(feature = "pam")]
struct HostStack;

#[cfg(feature = "pam")]
impl PamStack for HostStack {
    fn authenticate(&self, service: &str, login: &str, password: &str) -> Result<String, String> {
        let mut client = pam::Client::with_password(service).map_err(|e| e.to_string())?;
        client
            .conversation_mut()
            .set_credentials(login, password);
        client.authenticate().map_err(|e| e.to_string())?;
        Ok(login.to_string())
    }
}

#[cfg(not(feature = "pam"))]
struct HostStack;

#[cfg(not(feature = "pam"))]
impl PamStack for HostStack {
    fn authenticate(&self, _service: &str, _login: &str, _password: &str) -> Result<String, String> {
        Err("PAM support is not compiled in".to_string())
    }
}

pub fn host_stack() -> Arc<dyn PamStack> {
    Arc::new(HostStack)
}

pub async fn login(
    stores: &Stores,
    pam: Arc<dyn PamStack>,
    source: &Source,
    config: &Config,
    user: Option<User>,
    login: &str,
    password: &str,
) -> Result<User, Error> {
    let service = config.service_name.clone();
    let (pam_login, pam_password) = (login.to_string(), password.to_string());
    let result =
        tokio::task::spawn_blocking(move || pam.authenticate(&service, &pam_login, &pam_password))
            .await
            .map_err(|e| Error::Unavailable(format!("PAM task failed: {e}")))?;

    let pam_login = match result {
        Ok(pam_login) => pam_login,
        Err(message) if message.contains("Authentication failure") => {
            debug!("PAM refused '{login}'");
            return Err(Error::UserNotFound(login.to_string()));
        }
        Err(message) => return Err(Error::Unavailable(message)),
    };

    if let Some(user) = user {
        return Ok(user);
    }

    // Logins such as `user@DOMAIN` from Active Directory keep only the user part.
    let username = pam_login.split_once('@').map_or(pam_login.as_str(), |(name, _)| name);
    let email = if config.email_domain.is_empty() {
        pam_login.clone()
    } else {
        format!("{username}@{}", config.email_domain)
    };

    let user = stores
        .users
        .create_user(NewUser {
            name: username.to_string(),
            email,
            passwd: db::hash_password(password)?,
            login_type: SourceType::Pam,
            login_source: source.id,
            login_name: login.to_string(),
            is_active: true,
            ..NewUser::default()
        })
        .await?;
    info!("Created user '{}' from PAM source '{}'", user.name, source.name);
    Ok(user)
}
