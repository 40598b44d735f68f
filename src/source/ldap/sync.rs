use std::collections::HashSet;
use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::identity::{NewUser, User, UserColumn};
use crate::source::ldap::{
    bind_service_account, matches_filter, sync_public_keys, Config, Connector,
    Directory, Scope, SearchResult,
};
use crate::source::{Error, Source};
use crate::store::Stores;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    /// Entries that could not be applied. The pass carries on past them.
    pub failed: usize,
    /// Set when the directory returned nobody and deactivation was refused.
    pub deactivation_refused: bool,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deactivated",
            self.created, self.updated, self.deactivated
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.deactivation_refused {
            write!(f, " (empty directory result, deactivation refused)")?;
        }
        Ok(())
    }
}

async fn search_all(
    directory: &mut dyn Directory,
    config: &Config,
) -> Result<Vec<SearchResult>, Error> {
    bind_service_account(directory, config).await?;

    let filter = config.filter.replace("%s", "*");
    let entries = directory
        .search(&config.user_base, Scope::Subtree, &filter, &config.attributes())
        .await?;

    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut result = SearchResult::from_entry(config, &entry, "");
        if result.username.is_empty() {
            debug!("Skipping entry {} without a user name", entry.dn);
            continue;
        }
        result.is_admin = matches_filter(directory, &entry.dn, &config.admin_filter).await?;
        result.is_restricted = !result.is_admin
            && matches_filter(directory, &entry.dn, &config.restricted_filter).await?;
        results.push(result);
    }
    Ok(results)
}

/// Reconcile the local users of `source` with a full directory listing.
///
/// Stops between entries when `cancel` fires. Changes applied so far are kept.
#[instrument(skip_all, fields(source = %source.name))]
pub async fn synchronize(
    stores: &Stores,
    connector: &dyn Connector,
    source: &Source,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<SyncReport, Error> {
    let mut directory = connector.connect(config).await?;
    let listing = search_all(directory.as_mut(), config).await;
    directory.close().await;
    let listing = listing?;

    let mut report = SyncReport::default();
    let existing = stores.users.list_users_by_source(source.id).await?;

    if listing.is_empty() && !config.allow_deactivate_all {
        warn!("Directory search returned no users, refusing to deactivate all users of the source");
        report.deactivation_refused = true;
        return Ok(report);
    }

    let mut seen = HashSet::new();
    for result in &listing {
        if cancel.is_cancelled() {
            info!("Synchronisation cancelled: {report}");
            return Err(Error::Cancelled);
        }

        let lower_name = result.username.to_lowercase();
        seen.insert(lower_name.clone());

        let applied = match existing.iter().find(|user| user.lower_name == lower_name) {
            None => create_user(stores, source, config, result)
                .await
                .map(|()| report.created += 1),
            Some(user) => apply_update(stores, source, config, user, result)
                .await
                .map(|updated| report.updated += usize::from(updated)),
        };
        match applied {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                warn!("Unable to synchronise '{}': {error}", result.username);
                report.failed += 1;
            }
        }
    }

    for user in existing {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if user.is_active && !seen.contains(&user.lower_name) {
            debug!("Deactivating '{}', no longer in the directory", user.name);
            let user = User {
                is_active: false,
                ..user
            };
            match stores
                .users
                .update_user_columns(&user, &[UserColumn::IsActive])
                .await
            {
                Ok(()) => report.deactivated += 1,
                Err(error) => {
                    warn!("Unable to deactivate '{}': {error}", user.name);
                    report.failed += 1;
                }
            }
        }
    }

    info!("Synchronisation finished: {report}");
    Ok(report)
}

async fn create_user(
    stores: &Stores,
    source: &Source,
    config: &Config,
    result: &SearchResult,
) -> Result<(), Error> {
    let user = stores
        .users
        .create_user(NewUser {
            name: result.username.clone(),
            full_name: result.full_name(),
            email: result.email(),
            login_type: source.kind,
            login_source: source.id,
            login_name: result.username.clone(),
            is_active: true,
            is_admin: result.is_admin,
            is_restricted: result.is_restricted,
            ..NewUser::default()
        })
        .await?;
    debug!("Created '{}' during synchronisation", user.name);

    if config.harvests_ssh_keys() {
        sync_public_keys(stores.keys.as_ref(), &user, source, &result.ssh_public_keys).await?;
    }
    Ok(())
}

async fn apply_update(
    stores: &Stores,
    source: &Source,
    config: &Config,
    user: &User,
    result: &SearchResult,
) -> Result<bool, Error> {
    let updated = update_user(stores, config, user, result).await?;
    if config.harvests_ssh_keys() {
        sync_public_keys(stores.keys.as_ref(), user, source, &result.ssh_public_keys).await?;
    }
    Ok(updated)
}

async fn update_user(
    stores: &Stores,
    config: &Config,
    user: &User,
    result: &SearchResult,
) -> Result<bool, Error> {
    let mut updated = user.clone();
    let mut columns = Vec::new();

    let full_name = result.full_name();
    if updated.full_name != full_name {
        updated.full_name = full_name;
        columns.push(UserColumn::FullName);
    }
    let email = result.email();
    if updated.email != email {
        updated.email = email;
        columns.push(UserColumn::Email);
    }
    if !config.admin_filter.is_empty() && updated.is_admin != result.is_admin {
        updated.is_admin = result.is_admin;
        columns.push(UserColumn::IsAdmin);
    }
    if !config.restricted_filter.is_empty() && updated.is_restricted != result.is_restricted {
        updated.is_restricted = result.is_restricted;
        columns.push(UserColumn::IsRestricted);
    }
    if !updated.is_active {
        updated.is_active = true;
        columns.push(UserColumn::IsActive);
    }

    if columns.is_empty() {
        return Ok(false);
    }
    stores.users.update_user_columns(&updated, &columns).await?;
    Ok(true)
}
