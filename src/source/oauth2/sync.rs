use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identity::{ExternalLogin, User, UserColumn};
use crate::source::oauth2::{refresh, Registry};
use crate::source::{cancellable, Error, Source};
use crate::store::Stores;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub revoked: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} refreshed, {} revoked, {} failed, {} without refresh token",
            self.refreshed, self.revoked, self.failed, self.skipped
        )
    }
}

/// Refresh the stored provider tokens of every account linked through `source`.
///
/// A provider answering `invalid_grant` has withdrawn consent: the local account is deactivated
/// and its stored tokens are cleared instead of failing the pass.
pub async fn refresh_tokens(
    stores: &Stores,
    registry: &Registry,
    source: &Source,
    cancel: &CancellationToken,
) -> Result<RefreshReport, Error> {
    let provider = registry.get(&source.name).await?;
    let mut report = RefreshReport::default();

    for link in stores.external_logins.list_external_logins(source.id).await? {
        if cancel.is_cancelled() {
            info!("Token refresh cancelled: {report}");
            return Err(Error::Cancelled);
        }
        if link.refresh_token.is_empty() {
            report.skipped += 1;
            continue;
        }

        let result = cancellable(cancel, refresh(registry, &provider, &link.refresh_token)).await;
        match result {
            Ok(tokens) => {
                let expires_at = tokens.expires_at();
                let updated = ExternalLogin {
                    refresh_token: tokens.refresh_token.unwrap_or(link.refresh_token.clone()),
                    access_token: tokens.access_token,
                    expires_at,
                    ..link
                };
                stores.external_logins.upsert_external_login(&updated).await?;
                report.refreshed += 1;
            }
            Err(Error::InvalidGrant) => {
                revoke(stores, link).await?;
                report.revoked += 1;
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                warn!("Unable to refresh tokens of {}: {error}", link.external_id);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

async fn revoke(stores: &Stores, link: ExternalLogin) -> Result<(), Error> {
    debug!(
        "Provider revoked the grant of {}, deactivating user {}",
        link.external_id, link.user_id
    );
    let user = stores.users.get_user_by_id(link.user_id).await?;
    if user.is_active {
        let user = User {
            is_active: false,
            ..user
        };
        stores
            .users
            .update_user_columns(&user, &[UserColumn::IsActive])
            .await?;
    }

    stores
        .external_logins
        .upsert_external_login(&ExternalLogin {
            access_token: String::new(),
            refresh_token: String::new(),
            expires_at: None,
            ..link
        })
        .await?;
    Ok(())
}
