use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::signing::SigningKey;
use crate::store::{self, GrantStore};
use crate::token::{AccessTokenScope, Error};

/// Authorization a user gave an application. Tokens stay valid only while the row exists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Grant {
    pub id: i64,
    pub user_id: i64,
    pub application_id: i64,
    /// Number of refreshes so far. A refresh token is only accepted for the current value.
    pub counter: i64,
    pub scope: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrantClaims {
    pub gnt: i64,
    pub tt: TokenKind,
    pub sub: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cnt: i64,
    pub exp: i64,
    pub iat: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Clone, Debug, Serialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub struct Grants {
    store: Arc<dyn GrantStore>,
    key: Arc<SigningKey>,
    access_ttl: TimeDelta,
    refresh_ttl: TimeDelta,
}

impl Grants {
    pub fn new(
        store: Arc<dyn GrantStore>,
        key: Arc<SigningKey>,
        access_ttl: TimeDelta,
        refresh_ttl: TimeDelta,
    ) -> Self {
        Self {
            store,
            key,
            access_ttl,
            refresh_ttl,
        }
    }

    pub async fn create_grant(
        &self,
        user_id: i64,
        application_id: i64,
        scope: &str,
        nonce: &str,
    ) -> Result<Grant, Error> {
        let grant = Grant {
            id: 0,
            user_id,
            application_id,
            counter: 1,
            scope: scope.to_string(),
            nonce: nonce.to_string(),
            created_at: Utc::now(),
        };
        Ok(self.store.insert_grant(grant).await?)
    }

    pub fn issue(&self, grant: &Grant) -> Result<IssuedTokens, Error> {
        let now = Utc::now();
        let access = GrantClaims {
            gnt: grant.id,
            tt: TokenKind::Access,
            sub: grant.user_id.to_string(),
            cnt: 0,
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
        };
        let refresh = GrantClaims {
            tt: TokenKind::Refresh,
            cnt: grant.counter,
            exp: (now + self.refresh_ttl).timestamp(),
            ..access.clone()
        };

        Ok(IssuedTokens {
            access_token: self.key.sign(&access)?,
            refresh_token: self.key.sign(&refresh)?,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Signature, expiry, then existence of the grant. A deleted grant revokes every token
    /// issued under it.
    pub async fn verify_access_token(&self, token: &str) -> Result<Grant, Error> {
        let claims: GrantClaims = self.key.verify(token)?;
        if claims.tt != TokenKind::Access {
            debug!("Grant token {} is not an access token", claims.gnt);
            return Err(Error::Malformed);
        }
        self.load(claims.gnt).await
    }

    pub async fn refresh(&self, token: &str) -> Result<IssuedTokens, Error> {
        let claims: GrantClaims = self.key.verify(token)?;
        if claims.tt != TokenKind::Refresh {
            return Err(Error::Malformed);
        }

        let mut grant = self.load(claims.gnt).await?;
        if claims.cnt != grant.counter {
            warn!(
                "Refresh token for grant {} was replayed (counter {} != {}), revoking the grant",
                grant.id, claims.cnt, grant.counter
            );
            self.store.delete_grant(grant.id).await?;
            return Err(Error::Revoked("refresh token already used".to_string()));
        }

        grant.counter += 1;
        self.store.update_grant_counter(grant.id, grant.counter).await?;
        self.issue(&grant)
    }

    pub async fn revoke(&self, grant_id: i64) -> Result<(), Error> {
        Ok(self.store.delete_grant(grant_id).await?)
    }

    /// Token scope carried by the grant. Grants without token scope items get full access.
    pub fn scope_of(grant: &Grant) -> Result<AccessTokenScope, Error> {
        let items: Vec<&str> = grant
            .scope
            .split_whitespace()
            .filter(|item| item.contains(':') || *item == "all" || *item == "public-only")
            .collect();

        if items.is_empty() {
            return Ok(AccessTokenScope::all());
        }
        AccessTokenScope::parse(&items.join(","))
    }

    async fn load(&self, grant_id: i64) -> Result<Grant, Error> {
        match self.store.get_grant(grant_id).await {
            Ok(grant) => Ok(grant),
            Err(store::Error::NotFound) => {
                Err(Error::Revoked(format!("grant {grant_id} no longer exists")))
            }
            Err(error) => Err(error.into()),
        }
    }
}
