//! Persistence contracts consumed by the authentication pipeline.
//!
//! The pipeline only depends on these traits. `memory::MemoryStore` implements all of them for
//! the bundled server and for tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::identity::{ExternalLogin, NewUser, PublicKey, User, UserColumn};
use crate::source::StoredSource;
use crate::token::{AccessToken, AuthToken, ExternalAuthToken, Grant};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    NotFound,
    Duplicate(String),
    Backend(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "record not found"),
            Error::Duplicate(what) => write!(f, "duplicate record: {what}"),
            Error::Backend(err) => write!(f, "store backend error: {err}"),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user_by_id(&self, id: i64) -> Result<User, Error>;

    /// Case-insensitive lookup on the login name.
    async fn get_user_by_name(&self, name: &str) -> Result<User, Error>;

    async fn get_user_by_email(&self, email: &str) -> Result<User, Error>;

    /// Fails with `Error::Duplicate` when the name is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, Error>;

    /// Persist only `columns` from `user`.
    async fn update_user_columns(&self, user: &User, columns: &[UserColumn])
        -> Result<(), Error>;

    async fn list_users_by_source(&self, source_id: i64) -> Result<Vec<User>, Error>;
}

/// Server side session data keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, Error>;
    async fn set(&self, session_id: &str, key: &str, value: &str) -> Result<(), Error>;
    async fn delete(&self, session_id: &str, key: &str) -> Result<(), Error>;
    async fn exists(&self, session_id: &str) -> Result<bool, Error>;
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source(&self, id: i64) -> Result<StoredSource, Error>;
    async fn list_sources(&self) -> Result<Vec<StoredSource>, Error>;

    /// Returns the assigned id. Fails with `Error::Duplicate` when the name is taken.
    async fn insert_source(&self, source: StoredSource) -> Result<i64, Error>;
    async fn update_source(&self, source: &StoredSource) -> Result<(), Error>;
    async fn delete_source(&self, id: i64) -> Result<(), Error>;
}

#[async_trait]
pub trait AuthTokenStore: Send + Sync {
    async fn insert_auth_token(&self, token: &AuthToken) -> Result<(), Error>;
    async fn get_auth_token(&self, id: &str) -> Result<AuthToken, Error>;
    async fn update_auth_token(&self, token: &AuthToken) -> Result<(), Error>;
    async fn delete_auth_token(&self, id: &str) -> Result<(), Error>;
    async fn delete_expired_auth_tokens(&self, now: DateTime<Utc>) -> Result<usize, Error>;
}

#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    /// Returns the assigned id.
    async fn insert_access_token(&self, token: AccessToken) -> Result<i64, Error>;
    async fn find_access_tokens_by_last_eight(
        &self,
        last_eight: &str,
    ) -> Result<Vec<AccessToken>, Error>;
    async fn touch_access_token(&self, id: i64, used_at: DateTime<Utc>) -> Result<(), Error>;
    async fn delete_access_token(&self, id: i64) -> Result<(), Error>;
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Returns the grant with its assigned id.
    async fn insert_grant(&self, grant: Grant) -> Result<Grant, Error>;
    async fn get_grant(&self, id: i64) -> Result<Grant, Error>;
    async fn update_grant_counter(&self, id: i64, counter: i64) -> Result<(), Error>;
    async fn delete_grant(&self, id: i64) -> Result<(), Error>;
}

#[async_trait]
pub trait PublicKeyStore: Send + Sync {
    /// Principal key whose content equals `principal`.
    async fn find_principal_key(&self, principal: &str) -> Result<PublicKey, Error>;
    async fn find_key_by_fingerprint(&self, fingerprint: &str) -> Result<PublicKey, Error>;
    async fn list_keys_by_source(&self, owner_id: i64, source_id: i64)
        -> Result<Vec<PublicKey>, Error>;
    async fn add_key(&self, key: PublicKey) -> Result<PublicKey, Error>;
    async fn delete_key(&self, id: i64) -> Result<(), Error>;
}

#[async_trait]
pub trait ExternalLoginStore: Send + Sync {
    async fn get_external_login(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> Result<ExternalLogin, Error>;
    async fn upsert_external_login(&self, login: &ExternalLogin) -> Result<(), Error>;
    async fn list_external_logins(&self, source_id: i64) -> Result<Vec<ExternalLogin>, Error>;
}

#[async_trait]
pub trait ExternalAuthTokenStore: Send + Sync {
    async fn put_external_auth_token(&self, token: &ExternalAuthToken) -> Result<(), Error>;
    async fn get_external_auth_token(&self, session_id: &str)
        -> Result<ExternalAuthToken, Error>;
    async fn list_external_auth_tokens(&self) -> Result<Vec<ExternalAuthToken>, Error>;
    async fn delete_external_auth_token(&self, session_id: &str) -> Result<(), Error>;
}

/// Handles on every store contract, shared by the sources, methods and server.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub sources: Arc<dyn SourceStore>,
    pub auth_tokens: Arc<dyn AuthTokenStore>,
    pub access_tokens: Arc<dyn AccessTokenStore>,
    pub grants: Arc<dyn GrantStore>,
    pub keys: Arc<dyn PublicKeyStore>,
    pub external_logins: Arc<dyn ExternalLoginStore>,
    pub external_auth_tokens: Arc<dyn ExternalAuthTokenStore>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            sources: store.clone(),
            auth_tokens: store.clone(),
            access_tokens: store.clone(),
            grants: store.clone(),
            keys: store.clone(),
            external_logins: store.clone(),
            external_auth_tokens: store,
        }
    }
}
