use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::identity::{ExternalLogin, KeyKind, NewUser, PublicKey, User, UserColumn};
use crate::source::StoredSource;
use crate::store::{
    AccessTokenStore, AuthTokenStore, Error, ExternalAuthTokenStore, ExternalLoginStore,
    GrantStore, PublicKeyStore, SessionStore, SourceStore, UserStore,
};
use crate::token::{AccessToken, AuthToken, ExternalAuthToken, Grant};

/// Process-local implementation of every store contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    users: RwLock<HashMap<i64, User>>,
    sessions: RwLock<HashMap<String, HashMap<String, String>>>,
    sources: RwLock<HashMap<i64, StoredSource>>,
    auth_tokens: RwLock<HashMap<String, AuthToken>>,
    access_tokens: RwLock<HashMap<i64, AccessToken>>,
    grants: RwLock<HashMap<i64, Grant>>,
    keys: RwLock<HashMap<i64, PublicKey>>,
    external_logins: RwLock<HashMap<(i64, String), ExternalLogin>>,
    external_auth_tokens: RwLock<HashMap<String, ExternalAuthToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Using in-memory identity store");
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drop every key of a session, as a logout or expiry would.
    pub async fn destroy_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user_by_id(&self, id: i64) -> Result<User, Error> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn get_user_by_name(&self, name: &str) -> Result<User, Error> {
        let lower_name = name.to_lowercase();
        self.users
            .read()
            .await
            .values()
            .find(|user| user.lower_name == lower_name)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        self.users
            .read()
            .await
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, Error> {
        let mut users = self.users.write().await;

        let lower_name = user.name.to_lowercase();
        if users.values().any(|existing| existing.lower_name == lower_name) {
            return Err(Error::Duplicate(format!("user name '{}'", user.name)));
        }

        let user = user.into_user(self.allocate_id());
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user_columns(
        &self,
        user: &User,
        columns: &[UserColumn],
    ) -> Result<(), Error> {
        let mut users = self.users.write().await;
        let stored = users.get_mut(&user.id).ok_or(Error::NotFound)?;

        for column in columns {
            match column {
                UserColumn::FullName => stored.full_name.clone_from(&user.full_name),
                UserColumn::Email => stored.email.clone_from(&user.email),
                UserColumn::Passwd => stored.passwd.clone_from(&user.passwd),
                UserColumn::IsActive => stored.is_active = user.is_active,
                UserColumn::IsAdmin => stored.is_admin = user.is_admin,
                UserColumn::IsRestricted => stored.is_restricted = user.is_restricted,
                UserColumn::ProhibitLogin => stored.prohibit_login = user.prohibit_login,
                UserColumn::TwoFactorEnabled => {
                    stored.two_factor_enabled = user.two_factor_enabled;
                }
            }
        }
        Ok(())
    }

    async fn list_users_by_source(&self, source_id: i64) -> Result<Vec<User>, Error> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.login_source == source_id)
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, Error> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .and_then(|values| values.get(key))
            .cloned())
    }

    async fn set(&self, session_id: &str, key: &str, value: &str) -> Result<(), Error> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, session_id: &str, key: &str) -> Result<(), Error> {
        if let Some(values) = self.sessions.write().await.get_mut(session_id) {
            values.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool, Error> {
        Ok(self.sessions.read().await.contains_key(session_id))
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get_source(&self, id: i64) -> Result<StoredSource, Error> {
        self.sources
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list_sources(&self) -> Result<Vec<StoredSource>, Error> {
        let mut sources: Vec<StoredSource> =
            self.sources.read().await.values().cloned().collect();
        sources.sort_by_key(|source| source.id);
        Ok(sources)
    }

    async fn insert_source(&self, mut source: StoredSource) -> Result<i64, Error> {
        let mut sources = self.sources.write().await;
        if sources.values().any(|existing| existing.name == source.name) {
            return Err(Error::Duplicate(format!("source name '{}'", source.name)));
        }

        source.id = self.allocate_id();
        let id = source.id;
        sources.insert(id, source);
        Ok(id)
    }

    async fn update_source(&self, source: &StoredSource) -> Result<(), Error> {
        let mut sources = self.sources.write().await;
        if sources
            .values()
            .any(|existing| existing.name == source.name && existing.id != source.id)
        {
            return Err(Error::Duplicate(format!("source name '{}'", source.name)));
        }

        let stored = sources.get_mut(&source.id).ok_or(Error::NotFound)?;
        *stored = source.clone();
        Ok(())
    }

    async fn delete_source(&self, id: i64) -> Result<(), Error> {
        self.sources
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl AuthTokenStore for MemoryStore {
    async fn insert_auth_token(&self, token: &AuthToken) -> Result<(), Error> {
        let mut tokens = self.auth_tokens.write().await;
        if tokens.contains_key(&token.id) {
            return Err(Error::Duplicate(format!("auth token '{}'", token.id)));
        }
        tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn get_auth_token(&self, id: &str) -> Result<AuthToken, Error> {
        self.auth_tokens
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn update_auth_token(&self, token: &AuthToken) -> Result<(), Error> {
        let mut tokens = self.auth_tokens.write().await;
        let stored = tokens.get_mut(&token.id).ok_or(Error::NotFound)?;
        *stored = token.clone();
        Ok(())
    }

    async fn delete_auth_token(&self, id: &str) -> Result<(), Error> {
        self.auth_tokens.write().await.remove(id);
        Ok(())
    }

    async fn delete_expired_auth_tokens(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let mut tokens = self.auth_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| token.expires_at > now);
        Ok(before - tokens.len())
    }
}

#[async_trait]
impl AccessTokenStore for MemoryStore {
    async fn insert_access_token(&self, mut token: AccessToken) -> Result<i64, Error> {
        token.id = self.allocate_id();
        let id = token.id;
        self.access_tokens.write().await.insert(id, token);
        Ok(id)
    }

    async fn find_access_tokens_by_last_eight(
        &self,
        last_eight: &str,
    ) -> Result<Vec<AccessToken>, Error> {
        Ok(self
            .access_tokens
            .read()
            .await
            .values()
            .filter(|token| token.token_last_eight == last_eight)
            .cloned()
            .collect())
    }

    async fn touch_access_token(&self, id: i64, used_at: DateTime<Utc>) -> Result<(), Error> {
        let mut tokens = self.access_tokens.write().await;
        let token = tokens.get_mut(&id).ok_or(Error::NotFound)?;
        token.last_used_at = Some(used_at);
        Ok(())
    }

    async fn delete_access_token(&self, id: i64) -> Result<(), Error> {
        self.access_tokens.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn insert_grant(&self, mut grant: Grant) -> Result<Grant, Error> {
        grant.id = self.allocate_id();
        self.grants.write().await.insert(grant.id, grant.clone());
        Ok(grant)
    }

    async fn get_grant(&self, id: i64) -> Result<Grant, Error> {
        self.grants
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn update_grant_counter(&self, id: i64, counter: i64) -> Result<(), Error> {
        let mut grants = self.grants.write().await;
        let grant = grants.get_mut(&id).ok_or(Error::NotFound)?;
        grant.counter = counter;
        Ok(())
    }

    async fn delete_grant(&self, id: i64) -> Result<(), Error> {
        self.grants.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl PublicKeyStore for MemoryStore {
    async fn find_principal_key(&self, principal: &str) -> Result<PublicKey, Error> {
        self.keys
            .read()
            .await
            .values()
            .find(|key| key.kind == KeyKind::Principal && key.content == principal)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn find_key_by_fingerprint(&self, fingerprint: &str) -> Result<PublicKey, Error> {
        self.keys
            .read()
            .await
            .values()
            .find(|key| key.kind == KeyKind::User && key.fingerprint == fingerprint)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list_keys_by_source(
        &self,
        owner_id: i64,
        source_id: i64,
    ) -> Result<Vec<PublicKey>, Error> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .filter(|key| key.owner_id == owner_id && key.login_source_id == source_id)
            .cloned()
            .collect())
    }

    async fn add_key(&self, mut key: PublicKey) -> Result<PublicKey, Error> {
        let mut keys = self.keys.write().await;
        if key.kind == KeyKind::User
            && keys
                .values()
                .any(|existing| existing.fingerprint == key.fingerprint)
        {
            return Err(Error::Duplicate(format!("key '{}'", key.fingerprint)));
        }

        key.id = self.allocate_id();
        keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn delete_key(&self, id: i64) -> Result<(), Error> {
        self.keys.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ExternalLoginStore for MemoryStore {
    async fn get_external_login(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> Result<ExternalLogin, Error> {
        self.external_logins
            .read()
            .await
            .get(&(source_id, external_id.to_string()))
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn upsert_external_login(&self, login: &ExternalLogin) -> Result<(), Error> {
        self.external_logins.write().await.insert(
            (login.login_source_id, login.external_id.clone()),
            login.clone(),
        );
        Ok(())
    }

    async fn list_external_logins(&self, source_id: i64) -> Result<Vec<ExternalLogin>, Error> {
        let mut logins: Vec<ExternalLogin> = self
            .external_logins
            .read()
            .await
            .values()
            .filter(|login| login.login_source_id == source_id)
            .cloned()
            .collect();
        logins.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(logins)
    }
}

#[async_trait]
impl ExternalAuthTokenStore for MemoryStore {
    async fn put_external_auth_token(&self, token: &ExternalAuthToken) -> Result<(), Error> {
        self.external_auth_tokens
            .write()
            .await
            .insert(token.session_id.clone(), token.clone());
        Ok(())
    }

    async fn get_external_auth_token(
        &self,
        session_id: &str,
    ) -> Result<ExternalAuthToken, Error> {
        self.external_auth_tokens
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list_external_auth_tokens(&self) -> Result<Vec<ExternalAuthToken>, Error> {
        Ok(self
            .external_auth_tokens
            .read()
            .await
            .values()
            .cloned()
            .collect())
    }

    async fn delete_external_auth_token(&self, session_id: &str) -> Result<(), Error> {
        self.external_auth_tokens.write().await.remove(session_id);
        Ok(())
    }
}
