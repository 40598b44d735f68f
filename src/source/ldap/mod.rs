//! LDAP and direct-bind LDAP sources.
mod config;
mod directory;
mod sanitize;
mod sync;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashSet;

use ssh_key::HashAlg;
use tracing::{debug, info, instrument, warn};

use crate::identity::{KeyKind, NewUser, PublicKey, User, UserColumn};
use crate::source::{Error, Source, SourceType};
use crate::store::{self, PublicKeyStore, Stores};

pub use config::{Config, SecurityProtocol};
pub use directory::{Connector, Directory, Entry, Ldap3Connector, Scope};
pub use sanitize::{user_dn, user_filter};
pub use sync::{synchronize, SyncReport};

/// Attributes of a directory user that passed authentication.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResult {
    pub username: String,
    pub name: String,
    pub surname: String,
    pub mail: String,
    pub ssh_public_keys: Vec<String>,
    pub is_admin: bool,
    pub is_restricted: bool,
}

impl SearchResult {
    fn from_entry(config: &Config, entry: &Entry, fallback_username: &str) -> Self {
        let username = match entry.first(&config.attribute_username) {
            "" => fallback_username,
            username => username,
        };
        let ssh_public_keys = if config.harvests_ssh_keys() {
            entry.values(&config.attribute_ssh_public_key).to_vec()
        } else {
            Vec::new()
        };

        Self {
            username: username.to_string(),
            name: entry.first(&config.attribute_name).to_string(),
            surname: entry.first(&config.attribute_surname).to_string(),
            mail: entry.first(&config.attribute_mail).to_string(),
            ssh_public_keys,
            is_admin: false,
            is_restricted: false,
        }
    }

    pub fn full_name(&self) -> String {
        match (self.name.is_empty(), self.surname.is_empty()) {
            (true, true) => self.username.clone(),
            (true, false) => self.surname.clone(),
            (false, true) => self.name.clone(),
            (false, false) => format!("{} {}", self.name, self.surname),
        }
    }

    pub fn email(&self) -> String {
        if self.mail.is_empty() {
            format!("{}@localhost", self.username)
        } else {
            self.mail.clone()
        }
    }
}

/// Authenticate `login` against the directory. `Ok(None)` means the directory did not accept
/// the login; the connection is closed on every path.
#[instrument(skip(connector, config, password))]
pub async fn search_entry(
    connector: &dyn Connector,
    config: &Config,
    login: &str,
    password: &str,
    direct_bind: bool,
) -> Result<Option<SearchResult>, Error> {
    if password.is_empty() {
        debug!("Refusing empty password, the directory would treat it as an anonymous bind");
        return Ok(None);
    }

    let mut directory = connector.connect(config).await?;
    let result = lookup(directory.as_mut(), config, login, password, direct_bind).await;
    directory.close().await;
    result
}

fn single(entries: Vec<Entry>, login: &str) -> Option<Entry> {
    if entries.len() != 1 {
        debug!("Search for '{login}' returned {} entries", entries.len());
        return None;
    }
    entries.into_iter().next()
}

async fn lookup(
    directory: &mut dyn Directory,
    config: &Config,
    login: &str,
    password: &str,
    direct_bind: bool,
) -> Result<Option<SearchResult>, Error> {
    let Some(filter) = user_filter(&config.filter, login) else {
        debug!("Login contains characters not allowed in a filter");
        return Ok(None);
    };

    let user_dn = if direct_bind {
        let Some(user_dn) = user_dn(&config.user_dn, login) else {
            debug!("Login contains characters not allowed in a DN");
            return Ok(None);
        };
        if !directory.simple_bind(&user_dn, password).await? {
            return Ok(None);
        }

        if config.user_base.is_empty() {
            user_dn
        } else {
            let entries = directory
                .search(&config.user_base, Scope::Subtree, &filter, &[])
                .await?;
            let Some(entry) = single(entries, login) else {
                return Ok(None);
            };
            entry.dn
        }
    } else {
        bind_service_account(directory, config).await?;

        let entries = directory
            .search(&config.user_base, Scope::Subtree, &filter, &[])
            .await?;
        let Some(entry) = single(entries, login) else {
            return Ok(None);
        };

        if !config.attributes_in_bind && !directory.simple_bind(&entry.dn, password).await? {
            return Ok(None);
        }
        entry.dn
    };

    let entries = directory
        .search(&user_dn, Scope::Base, &filter, &config.attributes())
        .await?;
    let Some(entry) = single(entries, login) else {
        return Ok(None);
    };

    let mut result = SearchResult::from_entry(config, &entry, login);
    result.is_admin = matches_filter(directory, &user_dn, &config.admin_filter).await?;
    result.is_restricted =
        !result.is_admin && matches_filter(directory, &user_dn, &config.restricted_filter).await?;

    if config.has_group_filter() && !is_group_member(directory, config, &entry).await? {
        debug!("User '{login}' is not a member of the required group");
        return Ok(None);
    }

    if !direct_bind && config.attributes_in_bind && !directory.simple_bind(&user_dn, password).await?
    {
        return Ok(None);
    }

    Ok(Some(result))
}

pub(crate) async fn bind_service_account(
    directory: &mut dyn Directory,
    config: &Config,
) -> Result<(), Error> {
    if config.bind_dn.is_empty() {
        return Ok(());
    }
    if directory
        .simple_bind(&config.bind_dn, config.bind_password.expose())
        .await?
    {
        Ok(())
    } else {
        Err(Error::Unavailable(format!(
            "Directory refused credentials of bind DN '{}'",
            config.bind_dn
        )))
    }
}

pub(crate) async fn matches_filter(
    directory: &mut dyn Directory,
    user_dn: &str,
    filter: &str,
) -> Result<bool, Error> {
    if filter.is_empty() {
        return Ok(false);
    }
    let entries = directory
        .search(user_dn, Scope::Base, filter, &[])
        .await?;
    Ok(entries.len() == 1)
}

async fn is_group_member(
    directory: &mut dyn Directory,
    config: &Config,
    entry: &Entry,
) -> Result<bool, Error> {
    let uid = match entry.first(&config.user_uid) {
        "" => entry.dn.as_str(),
        uid => uid,
    };
    let filter = format!(
        "(&{}({}={}))",
        config.group_filter,
        config.group_member_uid,
        ldap3::ldap_escape(uid)
    );
    let groups = directory
        .search(&config.group_dn, Scope::Subtree, &filter, &["dn".to_string()])
        .await?;
    Ok(!groups.is_empty())
}

/// Sign `login` in through `source`, creating the local account on first success.
pub async fn login(
    stores: &Stores,
    connector: &dyn Connector,
    source: &Source,
    config: &Config,
    user: Option<User>,
    login: &str,
    password: &str,
) -> Result<User, Error> {
    let direct_bind = source.kind == SourceType::DLdap;
    let Some(result) = search_entry(connector, config, login, password, direct_bind).await? else {
        return Err(Error::UserNotFound(login.to_string()));
    };

    let user = match user {
        Some(user) => Some(user),
        None => match stores.users.get_user_by_name(&result.username).await {
            Ok(user) => Some(user),
            Err(store::Error::NotFound) => None,
            Err(error) => return Err(error.into()),
        },
    };

    if let Some(mut user) = user {
        let mut columns = Vec::new();
        if !user.prohibit_login && !config.admin_filter.is_empty() && user.is_admin != result.is_admin
        {
            user.is_admin = result.is_admin;
            columns.push(UserColumn::IsAdmin);
        }
        if !config.restricted_filter.is_empty() && user.is_restricted != result.is_restricted {
            user.is_restricted = result.is_restricted;
            columns.push(UserColumn::IsRestricted);
        }
        if !columns.is_empty() {
            stores.users.update_user_columns(&user, &columns).await?;
        }
        if config.harvests_ssh_keys() {
            sync_public_keys(stores.keys.as_ref(), &user, source, &result.ssh_public_keys).await?;
        }
        return Ok(user);
    }

    let user = stores
        .users
        .create_user(NewUser {
            name: result.username.clone(),
            full_name: result.full_name(),
            email: result.email(),
            login_type: source.kind,
            login_source: source.id,
            login_name: login.to_string(),
            is_active: true,
            is_admin: result.is_admin,
            is_restricted: result.is_restricted,
            ..NewUser::default()
        })
        .await?;
    info!("Created user '{}' from LDAP source '{}'", user.name, source.name);

    if config.harvests_ssh_keys() {
        sync_public_keys(stores.keys.as_ref(), &user, source, &result.ssh_public_keys).await?;
    }
    Ok(user)
}

/// Make the user's keys from `source` match the directory. Returns whether anything changed.
pub async fn sync_public_keys(
    keys: &dyn PublicKeyStore,
    user: &User,
    source: &Source,
    directory_keys: &[String],
) -> Result<bool, Error> {
    let mut wanted = Vec::new();
    for content in directory_keys {
        let content = content.trim();
        match ssh_key::PublicKey::from_openssh(content) {
            Ok(key) => wanted.push((key.fingerprint(HashAlg::Sha256).to_string(), content)),
            Err(error) => warn!(
                "Skipping invalid SSH key of '{}' from source '{}': {error}",
                user.name, source.name
            ),
        }
    }
    let wanted_fingerprints: HashSet<&str> = wanted.iter().map(|(fp, _)| fp.as_str()).collect();

    let existing = keys.list_keys_by_source(user.id, source.id).await?;
    let existing_fingerprints: HashSet<&str> =
        existing.iter().map(|key| key.fingerprint.as_str()).collect();

    let mut changed = false;
    for key in &existing {
        if !wanted_fingerprints.contains(key.fingerprint.as_str()) {
            keys.delete_key(key.id).await?;
            changed = true;
        }
    }

    for (fingerprint, content) in &wanted {
        if existing_fingerprints.contains(fingerprint.as_str()) {
            continue;
        }
        let key = PublicKey {
            owner_id: user.id,
            name: format!("{}-{}", source.name, fingerprint),
            fingerprint: fingerprint.clone(),
            content: (*content).to_string(),
            kind: KeyKind::User,
            login_source_id: source.id,
            ..PublicKey::default()
        };
        match keys.add_key(key).await {
            Ok(_) => changed = true,
            Err(store::Error::Duplicate(what)) => {
                warn!("SSH key of '{}' already registered: {what}", user.name);
            }
            Err(error) => return Err(error.into()),
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests;
