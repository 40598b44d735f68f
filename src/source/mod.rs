//! Identity sources: external systems that confirm a login/password pair or vouch for a
//! federated identity, plus the local account database.
//!
//! A stored source row carries a [`SourceType`] discriminator and an opaque configuration blob.
//! [`SourceConfig`] is the typed form of that blob; [`Sources`] owns the lifecycle of the rows and
//! dispatches sign-in attempts to the matching adapter.
mod cipher;
pub mod db;
mod error;
pub mod ldap;
pub mod oauth2;
pub mod pam;
pub mod smtp;
pub mod sspi;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::identity::User;
use crate::metrics_provider::SOURCE_DURATION;
use crate::store::{self, Stores};

pub use cipher::SecretBox;
pub use error::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    NoType,
    Plain,
    Ldap,
    Smtp,
    Pam,
    DLdap,
    OAuth2,
    Sspi,
}

impl SourceType {
    pub fn as_i32(self) -> i32 {
        match self {
            SourceType::NoType => 0,
            SourceType::Plain => 1,
            SourceType::Ldap => 2,
            SourceType::Smtp => 3,
            SourceType::Pam => 4,
            SourceType::DLdap => 5,
            SourceType::OAuth2 => 6,
            SourceType::Sspi => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::NoType => "notype",
            SourceType::Plain => "plain",
            SourceType::Ldap => "ldap",
            SourceType::Smtp => "smtp",
            SourceType::Pam => "pam",
            SourceType::DLdap => "dldap",
            SourceType::OAuth2 => "oauth2",
            SourceType::Sspi => "sspi",
        }
    }

    /// Sources that can check a login/password pair directly.
    pub fn accepts_password(self) -> bool {
        matches!(
            self,
            SourceType::Ldap | SourceType::DLdap | SourceType::Smtp | SourceType::Pam
        )
    }

    pub fn supports_sync(self) -> bool {
        matches!(
            self,
            SourceType::Ldap | SourceType::DLdap | SourceType::OAuth2
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source row as persisted. `cfg` is the JSON produced by [`SourceConfig::to_db`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredSource {
    pub id: i64,
    pub name: String,
    pub kind: SourceType,
    pub is_active: bool,
    pub is_sync_enabled: bool,
    pub cfg: Vec<u8>,
}

#[derive(Clone, Debug)]
pub enum SourceConfig {
    Database,
    Ldap(ldap::Config),
    Smtp(smtp::Config),
    Pam(pam::Config),
    OAuth2(oauth2::Config),
    Sspi(sspi::Config),
}

impl SourceConfig {
    fn matches(&self, kind: SourceType) -> bool {
        matches!(
            (self, kind),
            (
                SourceConfig::Database,
                SourceType::NoType | SourceType::Plain
            ) | (SourceConfig::Ldap(_), SourceType::Ldap | SourceType::DLdap)
                | (SourceConfig::Smtp(_), SourceType::Smtp)
                | (SourceConfig::Pam(_), SourceType::Pam)
                | (SourceConfig::OAuth2(_), SourceType::OAuth2)
                | (SourceConfig::Sspi(_), SourceType::Sspi)
        )
    }

    /// Whether accounts signing in through this source bypass local two-factor checks.
    pub fn skips_local_two_fa(&self) -> bool {
        match self {
            SourceConfig::Ldap(config) => config.skip_local_two_fa,
            SourceConfig::Smtp(config) => config.skip_local_two_fa,
            SourceConfig::Pam(config) => config.skip_local_two_fa,
            SourceConfig::OAuth2(config) => config.skip_local_two_fa,
            SourceConfig::Database | SourceConfig::Sspi(_) => false,
        }
    }

    /// Serialize for storage. The LDAP bind password is sealed with `secret_box`.
    pub fn to_db(&self, secret_box: &SecretBox) -> Result<Vec<u8>, Error> {
        let bytes = match self {
            SourceConfig::Database => b"{}".to_vec(),
            SourceConfig::Ldap(config) => {
                let mut config = config.clone();
                config.bind_password_encrypt = if config.bind_password.is_empty() {
                    String::new()
                } else {
                    secret_box.encrypt(config.bind_password.expose())?
                };
                serde_json::to_vec(&config)?
            }
            SourceConfig::Smtp(config) => serde_json::to_vec(config)?,
            SourceConfig::Pam(config) => serde_json::to_vec(config)?,
            SourceConfig::OAuth2(config) => serde_json::to_vec(config)?,
            SourceConfig::Sspi(config) => serde_json::to_vec(config)?,
        };
        Ok(bytes)
    }

    pub fn from_db(kind: SourceType, bytes: &[u8], secret_box: &SecretBox) -> Result<Self, Error> {
        let config = match kind {
            SourceType::NoType | SourceType::Plain => SourceConfig::Database,
            SourceType::Ldap | SourceType::DLdap => {
                let mut config: ldap::Config = serde_json::from_slice(bytes)?;
                if !config.bind_password_encrypt.is_empty() {
                    let password = secret_box.decrypt(&config.bind_password_encrypt)?;
                    config.bind_password = password.as_str().into();
                }
                SourceConfig::Ldap(config)
            }
            SourceType::Smtp => SourceConfig::Smtp(serde_json::from_slice(bytes)?),
            SourceType::Pam => SourceConfig::Pam(serde_json::from_slice(bytes)?),
            SourceType::OAuth2 => SourceConfig::OAuth2(serde_json::from_slice(bytes)?),
            SourceType::Sspi => SourceConfig::Sspi(serde_json::from_slice(bytes)?),
        };
        Ok(config)
    }

    /// Build from a configuration file table.
    pub fn from_value(kind: SourceType, value: toml::Value) -> Result<Self, Error> {
        let invalid = |e: toml::de::Error| Error::Configuration(e.to_string());
        let config = match kind {
            SourceType::NoType | SourceType::Plain => SourceConfig::Database,
            SourceType::Ldap | SourceType::DLdap => {
                SourceConfig::Ldap(value.try_into().map_err(invalid)?)
            }
            SourceType::Smtp => SourceConfig::Smtp(value.try_into().map_err(invalid)?),
            SourceType::Pam => SourceConfig::Pam(value.try_into().map_err(invalid)?),
            SourceType::OAuth2 => SourceConfig::OAuth2(value.try_into().map_err(invalid)?),
            SourceType::Sspi => SourceConfig::Sspi(value.try_into().map_err(invalid)?),
        };
        Ok(config)
    }
}

#[derive(Clone, Debug)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub kind: SourceType,
    pub is_active: bool,
    pub is_sync_enabled: bool,
    pub config: SourceConfig,
}

impl Source {
    pub fn new(name: &str, kind: SourceType, config: SourceConfig) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            kind,
            is_active: true,
            is_sync_enabled: false,
            config,
        }
    }

    fn from_stored(stored: StoredSource, secret_box: &SecretBox) -> Result<Self, Error> {
        let config = SourceConfig::from_db(stored.kind, &stored.cfg, secret_box)?;
        Ok(Self {
            id: stored.id,
            name: stored.name,
            kind: stored.kind,
            is_active: stored.is_active,
            is_sync_enabled: stored.is_sync_enabled,
            config,
        })
    }

    fn to_stored(&self, secret_box: &SecretBox) -> Result<StoredSource, Error> {
        Ok(StoredSource {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            is_active: self.is_active,
            is_sync_enabled: self.is_sync_enabled,
            cfg: self.config.to_db(secret_box)?,
        })
    }
}

/// Run `future` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

pub struct Sources {
    stores: Stores,
    secret_box: SecretBox,
    oauth2: Arc<oauth2::Registry>,
    ldap: Arc<dyn ldap::Connector>,
    pam: Arc<dyn pam::PamStack>,
}

impl Sources {
    pub fn new(stores: Stores, secret_box: SecretBox, oauth2: Arc<oauth2::Registry>) -> Self {
        Self {
            stores,
            secret_box,
            oauth2,
            ldap: Arc::new(ldap::Ldap3Connector),
            pam: pam::host_stack(),
        }
    }

    pub fn with_ldap_connector(mut self, connector: Arc<dyn ldap::Connector>) -> Self {
        self.ldap = connector;
        self
    }

    pub fn with_pam_stack(mut self, pam: Arc<dyn pam::PamStack>) -> Self {
        self.pam = pam;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn oauth2(&self) -> &Arc<oauth2::Registry> {
        &self.oauth2
    }

    pub async fn get(&self, id: i64) -> Result<Source, Error> {
        match self.stores.sources.get_source(id).await {
            Ok(stored) => Source::from_stored(stored, &self.secret_box),
            Err(store::Error::NotFound) => Err(Error::SourceNotFound(id)),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<Source>, Error> {
        self.stores
            .sources
            .list_sources()
            .await?
            .into_iter()
            .map(|stored| Source::from_stored(stored, &self.secret_box))
            .collect()
    }

    pub async fn active(&self, kind: SourceType) -> Result<Vec<Source>, Error> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|source| source.is_active && source.kind == kind)
            .collect())
    }

    #[instrument(skip(self, source), fields(source = %source.name, kind = %source.kind))]
    pub async fn create(&self, mut source: Source) -> Result<Source, Error> {
        if !source.config.matches(source.kind) {
            return Err(Error::Configuration(format!(
                "configuration does not match source type {}",
                source.kind
            )));
        }
        if !source.kind.supports_sync() {
            source.is_sync_enabled = false;
        }

        let stored = source.to_stored(&self.secret_box)?;
        source.id = match self.stores.sources.insert_source(stored).await {
            Ok(id) => id,
            Err(store::Error::Duplicate(_)) => return Err(Error::AlreadyExists(source.name)),
            Err(error) => return Err(error.into()),
        };

        if let (SourceConfig::OAuth2(config), true) = (&source.config, source.is_active) {
            if let Err(error) = self.oauth2.register(&source.name, config).await {
                warn!("Unable to register OAuth2 provider, removing the source: {error}");
                if let Err(delete_error) = self.stores.sources.delete_source(source.id).await {
                    warn!("Unable to remove source after failed registration: {delete_error}");
                }
                return Err(error);
            }
        }

        info!("Created identity source '{}' ({})", source.name, source.kind);
        Ok(source)
    }

    #[instrument(skip(self, source), fields(source = %source.name))]
    pub async fn update(&self, source: &Source) -> Result<(), Error> {
        if !source.config.matches(source.kind) {
            return Err(Error::Configuration(format!(
                "configuration does not match source type {}",
                source.kind
            )));
        }

        let original = match source.config {
            SourceConfig::OAuth2(_) => Some(self.stores.sources.get_source(source.id).await?),
            _ => None,
        };

        match self
            .stores
            .sources
            .update_source(&source.to_stored(&self.secret_box)?)
            .await
        {
            Ok(()) => {}
            Err(store::Error::Duplicate(_)) => {
                return Err(Error::AlreadyExists(source.name.clone()))
            }
            Err(error) => return Err(error.into()),
        }

        if let (SourceConfig::OAuth2(config), true) = (&source.config, source.is_active) {
            if let Err(error) = self.oauth2.register(&source.name, config).await {
                warn!("Unable to register OAuth2 provider, restoring the source: {error}");
                if let Some(original) = original {
                    if let Err(restore_error) = self.stores.sources.update_source(&original).await
                    {
                        warn!("Unable to restore source: {restore_error}");
                    }
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Refused while local users or external-login links still reference the source.
    pub async fn delete(&self, id: i64) -> Result<(), Error> {
        let source = self.get(id).await?;

        if !self.stores.users.list_users_by_source(id).await?.is_empty() {
            return Err(Error::InUse(id));
        }
        if !self
            .stores
            .external_logins
            .list_external_logins(id)
            .await?
            .is_empty()
        {
            return Err(Error::InUse(id));
        }

        if source.kind == SourceType::OAuth2 {
            self.oauth2.remove(&source.name).await;
        }
        self.stores.sources.delete_source(id).await?;
        info!("Deleted identity source '{}'", source.name);
        Ok(())
    }

    /// Rebuild the provider registry from the active OAuth2 source rows.
    pub async fn reset_oauth2(&self) -> Result<(), Error> {
        let sources = self.active(SourceType::OAuth2).await?;
        self.oauth2.clear().await;

        for source in sources {
            let SourceConfig::OAuth2(config) = &source.config else {
                continue;
            };
            if let Err(error) = self.oauth2.register(&source.name, config).await {
                warn!("Unable to register OAuth2 source '{}': {error}", source.name);
            }
        }
        Ok(())
    }

    pub async fn sspi_config(&self) -> Result<Option<sspi::Config>, Error> {
        Ok(self
            .active(SourceType::Sspi)
            .await?
            .into_iter()
            .find_map(|source| match source.config {
                SourceConfig::Sspi(config) => Some(config),
                _ => None,
            }))
    }

    pub async fn skips_local_two_fa(&self, user: &User) -> bool {
        if user.is_local() {
            return false;
        }
        match self.get(user.login_source).await {
            Ok(source) => source.config.skips_local_two_fa(),
            Err(error) => {
                warn!("Unable to load source of '{}': {error}", user.name);
                false
            }
        }
    }

    /// Verify a login/password pair. `login` is an e-mail address when it contains `@`.
    #[instrument(skip(self, password, cancel))]
    pub async fn sign_in(
        &self,
        login: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<User, Error> {
        let login = login.trim();
        if login.is_empty() {
            return Err(Error::UserNotFound(String::new()));
        }

        let existing = if login.contains('@') {
            self.stores
                .users
                .get_user_by_email(&login.to_lowercase())
                .await
        } else {
            self.stores.users.get_user_by_name(login).await
        };

        match existing {
            Ok(user) if user.is_local() || user.login_type == SourceType::OAuth2 => {
                if !db::verify_password(&user, password) {
                    return Err(Error::UserNotFound(user.name));
                }
                if !user.can_sign_in() {
                    return Err(Error::ProhibitLogin(user.name));
                }
                Ok(user)
            }
            Ok(user) => {
                let source = self.get(user.login_source).await?;
                let login_name = user.login_name.clone();
                self.external_login(Some(user), &login_name, password, &source, cancel)
                    .await
            }
            Err(store::Error::NotFound) => {
                let mut attempted = 0;
                let mut unavailable = Vec::new();
                for source in self.list().await? {
                    if !source.is_active || !source.kind.accepts_password() {
                        continue;
                    }
                    attempted += 1;
                    match self
                        .external_login(None, login, password, &source, cancel)
                        .await
                    {
                        Ok(user) => return Ok(user),
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(Error::Unavailable(err)) => {
                            warn!("Failed to login '{login}' via '{}': {err}", source.name);
                            unavailable.push(format!("{}: {err}", source.name));
                        }
                        Err(error) => {
                            warn!("Failed to login '{login}' via '{}': {error}", source.name);
                        }
                    }
                }
                // Only an outage of every candidate backend is reported as such.
                if attempted > 0 && unavailable.len() == attempted {
                    return Err(Error::Unavailable(unavailable.join("; ")));
                }
                Err(Error::UserNotFound(login.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Authenticate against one external source, creating the local account on first success.
    pub async fn external_login(
        &self,
        user: Option<User>,
        login: &str,
        password: &str,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<User, Error> {
        if !source.is_active {
            return Err(Error::SourceNotActive(source.name.clone()));
        }

        debug!("Authenticating '{login}' against '{}'", source.name);
        let _timer = SOURCE_DURATION
            .with_label_values(&[source.kind.as_str()])
            .start_timer();

        let attempt = async {
            match &source.config {
                SourceConfig::Ldap(config) => {
                    ldap::login(
                        &self.stores,
                        self.ldap.as_ref(),
                        source,
                        config,
                        user,
                        login,
                        password,
                    )
                    .await
                }
                SourceConfig::Smtp(config) => {
                    smtp::login(&self.stores, source, config, user, login, password).await
                }
                SourceConfig::Pam(config) => {
                    pam::login(
                        &self.stores,
                        self.pam.clone(),
                        source,
                        config,
                        user,
                        login,
                        password,
                    )
                    .await
                }
                _ => Err(Error::Unsupported(format!(
                    "password sign-in through {} sources",
                    source.kind
                ))),
            }
        };
        let user = cancellable(cancel, attempt).await?;

        if !user.can_sign_in() {
            return Err(Error::ProhibitLogin(user.name));
        }
        Ok(user)
    }

    /// One synchronisation pass over every active, sync-enabled source.
    pub async fn synchronize(&self, cancel: &CancellationToken) -> Result<(), Error> {
        for source in self.list().await? {
            if !source.is_active || !source.is_sync_enabled {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = match &source.config {
                SourceConfig::Ldap(config) => {
                    ldap::synchronize(&self.stores, self.ldap.as_ref(), &source, config, cancel)
                        .await
                        .map(|report| info!("LDAP source '{}': {report}", source.name))
                }
                SourceConfig::OAuth2(_) => {
                    oauth2::refresh_tokens(&self.stores, &self.oauth2, &source, cancel)
                        .await
                        .map(|report| info!("OAuth2 source '{}': {report}", source.name))
                }
                _ => Ok(()),
            };

            match result {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => warn!("Synchronisation of '{}' failed: {error}", source.name),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
